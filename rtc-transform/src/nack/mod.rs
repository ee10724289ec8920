//! Generic NACK generation driven by the retransmission scheduler.
//!
//! A [`NackTracker`] sits on the incoming RTP sub-flow and records sequence
//! numbers per SSRC. The matching [`NackWorker`] is a
//! [`WorkProducer`](crate::scheduler::WorkProducer): it reports work while
//! some stream has unrequested gaps and turns them into RTCP Generic NACKs
//! handed to a [`NackSink`].

pub(crate) mod receive_log;

use crate::chain::{PacketTransformer, TransformEngine};
use crate::scheduler::WorkProducer;
use crate::wire_unit::WireUnit;
use bytes::Bytes;
use log::{debug, trace, warn};
use receive_log::ReceiveLog;
use rtcp::transport_feedbacks::transport_layer_nack::{
    TransportLayerNack, nack_pairs_from_sequence_numbers,
};
use shared::error::{Error, Result};
use shared::marshal::Marshal;
use shared::util::match_rtp;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Destination of generated NACK packets.
pub trait NackSink: Send + Sync {
    /// `nack` is one marshaled RTCP Generic NACK packet.
    fn send_nack(&self, nack: Bytes) -> Result<()>;
}

impl NackSink for crossbeam_channel::Sender<Bytes> {
    fn send_nack(&self, nack: Bytes) -> Result<()> {
        self.send(nack)
            .map_err(|_| Error::Other("NACK receiver disconnected".to_owned()))
    }
}

/// Builder for the [`NackWorker`].
///
/// # Example
///
/// ```ignore
/// use rtc_transform::{NackWorkerBuilder, Registry, SchedulerBuilder};
/// use std::sync::Arc;
///
/// let (tx, rx) = crossbeam_channel::unbounded();
/// let worker = NackWorkerBuilder::new()
///     .with_size(512)
///     .with_skip_last_n(2)
///     .build(Arc::new(tx))?;
/// let chain = Registry::new().with(worker.tracker()).build();
/// let scheduler = SchedulerBuilder::new().build(Arc::new(worker))?;
/// ```
pub struct NackWorkerBuilder {
    size: u16,
    skip_last_n: u16,
    max_nacks_per_packet: u16,
    resend_interval: Duration,
    sender_ssrc: Option<u32>,
}

impl Default for NackWorkerBuilder {
    fn default() -> Self {
        Self {
            size: 512,
            skip_last_n: 0,
            max_nacks_per_packet: 0,
            resend_interval: Duration::from_millis(100),
            sender_ssrc: None,
        }
    }
}

impl NackWorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive log size per stream, a power of two between 64 and 32768.
    pub fn with_size(mut self, size: u16) -> Self {
        self.size = size;
        self
    }

    /// Do not request the newest `n` positions; they may just be late.
    pub fn with_skip_last_n(mut self, n: u16) -> Self {
        self.skip_last_n = n;
        self
    }

    /// How many times a sequence number is requested at most. 0 = no limit.
    pub fn with_max_nacks_per_packet(mut self, max: u16) -> Self {
        self.max_nacks_per_packet = max;
        self
    }

    /// Minimum time between two NACKs for the same stream.
    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }

    /// SSRC the NACKs are sent from. Random by default.
    pub fn with_sender_ssrc(mut self, ssrc: u32) -> Self {
        self.sender_ssrc = Some(ssrc);
        self
    }

    pub fn build(self, sink: Arc<dyn NackSink>) -> Result<NackWorker> {
        // reject a bad size before the first stream shows up
        ReceiveLog::new(self.size)?;

        Ok(NackWorker {
            state: Arc::new(NackState {
                size: self.size,
                skip_last_n: self.skip_last_n,
                max_nacks_per_packet: self.max_nacks_per_packet,
                resend_interval: self.resend_interval,
                sender_ssrc: self.sender_ssrc.unwrap_or_else(rand::random),
                sink,
                streams: Mutex::new(HashMap::new()),
            }),
        })
    }
}

struct StreamLog {
    log: ReceiveLog,
    nack_counts: HashMap<u16, u16>,
    last_sent: Option<Instant>,
}

impl StreamLog {
    /// Missing sequence numbers still allowed to be requested.
    fn pending(&self, skip_last_n: u16, max_nacks: u16) -> Vec<u16> {
        let missing = self.log.missing(skip_last_n);
        if max_nacks == 0 {
            return missing;
        }
        missing
            .into_iter()
            .filter(|seq| self.nack_counts.get(seq).copied().unwrap_or(0) < max_nacks)
            .collect()
    }

    fn is_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_sent
            .is_none_or(|sent| now.saturating_duration_since(sent) >= interval)
    }
}

struct NackState {
    size: u16,
    skip_last_n: u16,
    max_nacks_per_packet: u16,
    resend_interval: Duration,
    sender_ssrc: u32,
    sink: Arc<dyn NackSink>,
    streams: Mutex<HashMap<u32, StreamLog>>,
}

impl NackState {
    fn streams(&self) -> MutexGuard<'_, HashMap<u32, StreamLog>> {
        match self.streams.lock() {
            Ok(streams) => streams,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, ssrc: u32, seq: u16) {
        let mut streams = self.streams();
        if !streams.contains_key(&ssrc) {
            match ReceiveLog::new(self.size) {
                Ok(log) => {
                    debug!("tracking RTP stream {ssrc} for NACK");
                    streams.insert(
                        ssrc,
                        StreamLog {
                            log,
                            nack_counts: HashMap::new(),
                            last_sent: None,
                        },
                    );
                }
                Err(err) => {
                    warn!("cannot track stream {ssrc}: {err}");
                    return;
                }
            }
        }
        if let Some(stream) = streams.get_mut(&ssrc) {
            stream.log.record(seq);
        }
    }

    /// Builds the NACKs that are due now and marks them as sent.
    fn collect(&self, now: Instant) -> Vec<TransportLayerNack> {
        let mut nacks = vec![];
        for (&ssrc, stream) in self.streams().iter_mut() {
            if !stream.is_due(now, self.resend_interval) {
                continue;
            }

            let missing = stream.log.missing(self.skip_last_n);
            stream.nack_counts.retain(|seq, _| missing.contains(seq));

            let pending = stream.pending(self.skip_last_n, self.max_nacks_per_packet);
            if pending.is_empty() {
                continue;
            }
            if self.max_nacks_per_packet > 0 {
                for seq in &pending {
                    *stream.nack_counts.entry(*seq).or_default() += 1;
                }
            }
            stream.last_sent = Some(now);

            trace!("NACK for stream {ssrc}: {pending:?}");
            nacks.push(TransportLayerNack {
                sender_ssrc: self.sender_ssrc,
                media_ssrc: ssrc,
                nacks: nack_pairs_from_sequence_numbers(&pending),
            });
        }
        nacks
    }
}

/// Scheduler work producer emitting Generic NACKs. Clones share state.
#[derive(Clone)]
pub struct NackWorker {
    state: Arc<NackState>,
}

impl NackWorker {
    pub fn sender_ssrc(&self) -> u32 {
        self.state.sender_ssrc
    }

    /// The chain engine feeding this worker.
    pub fn tracker(&self) -> NackTracker {
        NackTracker {
            state: Arc::clone(&self.state),
        }
    }

    /// Stops tracking `ssrc`.
    pub fn unbind(&self, ssrc: u32) {
        self.state.streams().remove(&ssrc);
    }

    pub fn tracked_streams(&self) -> usize {
        self.state.streams().len()
    }
}

impl WorkProducer for NackWorker {
    fn has_work(&self) -> bool {
        let now = Instant::now();
        let state = &self.state;
        state.streams().values().any(|stream| {
            stream.is_due(now, state.resend_interval)
                && !stream
                    .pending(state.skip_last_n, state.max_nacks_per_packet)
                    .is_empty()
        })
    }

    fn do_work(&self) -> Result<()> {
        let nacks = self.state.collect(Instant::now());

        let mut result = Ok(());
        for nack in nacks {
            let sent = nack
                .marshal()
                .and_then(|raw| self.state.sink.send_nack(raw));
            if let Err(err) = sent {
                warn!("failed to send NACK for stream {}: {err}", nack.media_ssrc);
                result = Err(err);
            }
        }
        result
    }
}

/// Records incoming RTP sequence numbers for a [`NackWorker`].
pub struct NackTracker {
    state: Arc<NackState>,
}

impl PacketTransformer for NackTracker {
    fn transform(&mut self, unit: WireUnit) -> Option<WireUnit> {
        Some(unit)
    }

    fn reverse_transform(&mut self, unit: WireUnit) -> Option<WireUnit> {
        if !match_rtp(unit.as_bytes()) {
            return Some(unit);
        }
        if let (Some(ssrc), Some(seq)) = (unit.ssrc(), unit.sequence_number()) {
            self.state.record(ssrc, seq);
        }
        Some(unit)
    }
}

impl TransformEngine for NackTracker {
    fn rtp_transformer(&mut self) -> Option<&mut dyn PacketTransformer> {
        Some(self)
    }
}
