//! Transform chain framework.
//!
//! A chain is an ordered list of [`TransformEngine`]s. Each engine contributes
//! up to two [`PacketTransformer`]s, one for the RTP sub-flow and one for the
//! RTCP sub-flow. Outgoing units visit the engines first to last, incoming
//! units last to first:
//!
//! ```text
//! transform:         App -> E0 -> E1 -> E2 -> Network
//! reverse_transform: App <- E0 <- E1 <- E2 <- Network
//! ```

pub(crate) mod gated;
pub(crate) mod pipeline;
pub(crate) mod registry;
pub(crate) mod rtcp_stage;

use crate::wire_unit::WireUnit;

/// Sub-flow a unit belongs to.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Flow {
    #[default]
    Rtp,
    Rtcp,
}

impl Flow {
    /// Classifies a unit with RFC 5761 demultiplexing.
    pub fn of(unit: &WireUnit) -> Self {
        if unit.is_rtcp() { Flow::Rtcp } else { Flow::Rtp }
    }
}

/// One direction-aware processing step. Returning `None` drops the unit.
pub trait PacketTransformer {
    /// Outgoing direction.
    fn transform(&mut self, unit: WireUnit) -> Option<WireUnit>;

    /// Incoming direction.
    fn reverse_transform(&mut self, unit: WireUnit) -> Option<WireUnit>;

    fn close(&mut self) {}
}

/// A chain stage. Either transformer may be absent, in which case units of
/// that sub-flow skip the stage.
pub trait TransformEngine {
    fn rtp_transformer(&mut self) -> Option<&mut dyn PacketTransformer> {
        None
    }

    fn rtcp_transformer(&mut self) -> Option<&mut dyn PacketTransformer> {
        None
    }

    fn close(&mut self) {
        if let Some(t) = self.rtp_transformer() {
            t.close();
        }
        if let Some(t) = self.rtcp_transformer() {
            t.close();
        }
    }
}

/// Adapts a single transformer into an engine serving one sub-flow.
pub struct FlowEngine<T> {
    flow: Flow,
    transformer: T,
}

impl<T: PacketTransformer> FlowEngine<T> {
    pub fn new(flow: Flow, transformer: T) -> Self {
        Self { flow, transformer }
    }

    pub fn rtp(transformer: T) -> Self {
        Self::new(Flow::Rtp, transformer)
    }

    pub fn rtcp(transformer: T) -> Self {
        Self::new(Flow::Rtcp, transformer)
    }

    pub fn get_ref(&self) -> &T {
        &self.transformer
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transformer
    }
}

impl<T: PacketTransformer> TransformEngine for FlowEngine<T> {
    fn rtp_transformer(&mut self) -> Option<&mut dyn PacketTransformer> {
        match self.flow {
            Flow::Rtp => Some(&mut self.transformer),
            Flow::Rtcp => None,
        }
    }

    fn rtcp_transformer(&mut self) -> Option<&mut dyn PacketTransformer> {
        match self.flow {
            Flow::Rtp => None,
            Flow::Rtcp => Some(&mut self.transformer),
        }
    }
}
