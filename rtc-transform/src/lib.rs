//! RTC Transform - Sans-IO RTP/RTCP packet transform chain.
//!
//! Every datagram between the socket and the codecs travels as a
//! [`WireUnit`] through an ordered chain of [`TransformEngine`]s. Each engine
//! may contribute a transformer for the RTP sub-flow, the RTCP sub-flow, or
//! both.
//!
//! # Available Engines
//!
//! | Engine | Sub-flow | Description |
//! |--------|----------|-------------|
//! | [`RedFilter`] | RTP | Strips incoming RFC 2198 RED payloads down to the primary block |
//! | [`StatisticsEngine`] | RTCP | Per-SSRC jitter aggregates, incoming report dispatch, XR VoIP metrics (RFC 3611) |
//! | [`TerminationStage`] | RTCP | Consults a pluggable strategy about incoming RTCP |
//! | [`DelayLine`] | either | Holds incoming units back by a fixed number of positions |
//! | [`NackTracker`] | RTP | Records received sequence numbers for Generic NACK generation |
//!
//! Custom stages implement [`PacketTransformer`] (wrapped in a
//! [`FlowEngine`] or [`Gated`]) or, for parsed RTCP,
//! [`RtcpPacketTransformer`] wrapped in an [`RtcpStage`].
//!
//! # Direction
//!
//! ```text
//! transform:         App -> E0 -> E1 -> E2 -> Network
//! reverse_transform: App <- E0 <- E1 <- E2 <- Network
//! ```
//!
//! [`TransformChain`] implements [`sansio::Protocol`]: `handle_write` runs the
//! outgoing direction and `handle_read` the incoming one, with RFC 5761
//! demultiplexing of RTP and RTCP.
//!
//! # Quick Start
//!
//! ```ignore
//! use rtc_transform::{
//!     MediaKind, RedFilterBuilder, Registry, StatisticsEngineBuilder, TaggedUnit,
//!     TerminationStage, WireUnit,
//! };
//! use sansio::Protocol;
//! use std::time::Instant;
//!
//! let stats = StatisticsEngineBuilder::new()
//!     .with_media_kind(MediaKind::Audio)
//!     .build();
//!
//! let mut chain = Registry::new()
//!     .with(stats.clone())
//!     .with(TerminationStage::new().engine())
//!     .with(RedFilterBuilder::new().with_payload_type(63).build())
//!     .with_compound_splitting()
//!     .build();
//!
//! chain.handle_read(TaggedUnit::new(Instant::now(), WireUnit::from(datagram)))?;
//! while let Some(unit) = chain.poll_read() {
//!     // hand unit.message to the depacketizer
//! }
//! println!("average jitter: {}", stats.average_jitter());
//! ```
//!
//! The [`RetransmissionScheduler`] runs a [`WorkProducer`], such as the
//! [`NackWorker`], on a background thread.

#![warn(rust_2018_idioms)]

pub mod compound;
pub mod red;
pub mod scheduler;

mod chain;
mod delay;
mod nack;
mod stats;
mod termination;
mod wire_unit;

use shared::TransportMessage;

pub use chain::gated::Gated;
pub use chain::pipeline::TransformChain;
pub use chain::registry::Registry;
pub use chain::rtcp_stage::{RtcpOutcome, RtcpPacketTransformer, RtcpStage};
pub use chain::{Flow, FlowEngine, PacketTransformer, TransformEngine};
pub use delay::DelayLine;
pub use nack::{NackSink, NackTracker, NackWorker, NackWorkerBuilder};
pub use red::RedBlock;
pub use red::filter::{RedFilter, RedFilterBuilder};
pub use scheduler::{RetransmissionScheduler, SchedulerBuilder, WorkProducer};
pub use stats::stream_stats::{StreamStats, StreamStatsSnapshot, StreamStatsTable};
pub use stats::xr::{
    BurstMetrics, ReceiveStatistics, StreamReceiveStats, insertion_index, synthesize,
    voip_metrics_block,
};
pub use stats::{
    FeedbackBlock, MediaKind, RemoteLoss, RtcpCounters, RtcpListener, RtcpReport, SenderInfo,
    StatisticsEngine, StatisticsEngineBuilder,
};
pub use termination::{RtcpTerminationStrategy, TerminationHandle, TerminationStage};
pub use wire_unit::{RTP_FIXED_HEADER_LENGTH, WireUnit};

/// A [`WireUnit`] with its receive/send time and transport addresses.
pub type TaggedUnit = TransportMessage<WireUnit>;
