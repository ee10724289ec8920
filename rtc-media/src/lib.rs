//! RTC Media - receive side audio decisions and capture plumbing.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`LossConcealment`] | Classifies each RTP payload by sequence number and decodes it, recovering a single lost frame with FEC or concealing short gaps with PLC |
//! | [`SilenceTimeline`] | Fills RTP timestamp gaps with silence, chunk by chunk |
//! | [`DevicePump`] | Runs frames from an [`AudioDevice`] through a [`SilenceTimeline`] |
//!
//! Codecs and devices stay outside this crate behind the [`Codec`] and
//! [`CaptureDevice`] traits.

#![warn(rust_2018_idioms)]

mod codec;
mod concealment;
mod device;
mod frame;
mod silence;

pub use codec::Codec;
pub use concealment::{
    Arrival, ConcealmentOutput, ConcealmentState, LossConcealment, LossConcealmentBuilder,
};
pub use device::{
    AudioDevice, CaptureDevice, DevicePump, DeviceSession, VideoDevice, VideoFrame,
};
pub use frame::{AudioFrame, FrameOrigin};
pub use silence::{SilenceTimeline, SilenceTimelineBuilder};
