//! Incoming RTCP termination.
//!
//! The stage itself has no policy. It consults a pluggable
//! [`RtcpTerminationStrategy`] that can be installed or swapped at runtime
//! through a [`TerminationHandle`].

use crate::chain::rtcp_stage::{RtcpOutcome, RtcpPacketTransformer, RtcpStage};
use log::{debug, warn};
use rtcp::compound_packet::CompoundPacket;
use std::sync::{Arc, Mutex};

/// Decides what incoming RTCP reaches the application. Returning `None` or
/// an empty packet terminates the RTCP.
pub trait RtcpTerminationStrategy: Send {
    fn reverse_transform(&mut self, packet: &CompoundPacket) -> Option<CompoundPacket>;

    /// Outgoing RTCP is never modified by the stage; this is a notification.
    fn transform(&mut self, _packet: &CompoundPacket) {}
}

type SharedStrategy = Arc<Mutex<Option<Box<dyn RtcpTerminationStrategy>>>>;

/// Swaps the strategy of a [`TerminationStage`] that already sits in a chain.
#[derive(Clone, Default)]
pub struct TerminationHandle {
    strategy: SharedStrategy,
}

impl TerminationHandle {
    pub fn set(&self, strategy: Box<dyn RtcpTerminationStrategy>) {
        match self.strategy.lock() {
            Ok(mut s) => *s = Some(strategy),
            Err(poisoned) => *poisoned.into_inner() = Some(strategy),
        }
    }

    pub fn clear(&self) {
        match self.strategy.lock() {
            Ok(mut s) => *s = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    pub fn is_set(&self) -> bool {
        self.strategy.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

/// Parsed-RTCP stage backed by a [`TerminationHandle`]. Put it in a chain
/// with [`TerminationStage::engine`].
#[derive(Default)]
pub struct TerminationStage {
    handle: TerminationHandle,
}

impl TerminationStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(strategy: Box<dyn RtcpTerminationStrategy>) -> Self {
        let stage = Self::default();
        stage.handle.set(strategy);
        stage
    }

    pub fn handle(&self) -> TerminationHandle {
        self.handle.clone()
    }

    /// Wraps the stage for use as a chain engine.
    pub fn engine(self) -> RtcpStage<Self> {
        RtcpStage::new(self)
    }
}

impl RtcpPacketTransformer for TerminationStage {
    fn transform(&mut self, packet: &CompoundPacket) -> RtcpOutcome {
        if let Ok(mut strategy) = self.handle.strategy.lock()
            && let Some(strategy) = strategy.as_mut()
        {
            strategy.transform(packet);
        }
        RtcpOutcome::Unchanged
    }

    fn reverse_transform(&mut self, packet: &CompoundPacket) -> RtcpOutcome {
        let mut guard = match self.handle.strategy.lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("termination strategy lock poisoned, passing RTCP through");
                return RtcpOutcome::Unchanged;
            }
        };
        let Some(strategy) = guard.as_mut() else {
            return RtcpOutcome::Unchanged;
        };

        match strategy.reverse_transform(packet) {
            None => {
                debug!("RTCP terminated ({} packets)", packet.len());
                RtcpOutcome::Drop
            }
            Some(out) if out.is_empty() => {
                debug!("RTCP terminated ({} packets)", packet.len());
                RtcpOutcome::Drop
            }
            Some(out) if &out == packet => RtcpOutcome::Unchanged,
            Some(out) => RtcpOutcome::Replace(out),
        }
    }

    fn close(&mut self) {
        self.handle.clear();
    }
}
