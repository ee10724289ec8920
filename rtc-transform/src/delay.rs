use crate::chain::{Flow, PacketTransformer, TransformEngine};
use crate::wire_unit::WireUnit;

/// Holds back incoming units by a fixed number of positions. Each
/// `reverse_transform` returns the unit received `slots` calls earlier, and
/// nothing for the first `slots` calls. Outgoing units are not delayed.
///
/// A zero-slot line passes everything through.
pub struct DelayLine {
    flow: Flow,
    ring: Vec<Option<WireUnit>>,
    idx: usize,
}

impl DelayLine {
    pub fn new(flow: Flow, slots: usize) -> Self {
        Self {
            flow,
            ring: (0..slots).map(|_| None).collect(),
            idx: 0,
        }
    }

    pub fn slots(&self) -> usize {
        self.ring.len()
    }

    /// Units currently held back.
    pub fn pending(&self) -> usize {
        self.ring.iter().filter(|u| u.is_some()).count()
    }
}

impl PacketTransformer for DelayLine {
    fn transform(&mut self, unit: WireUnit) -> Option<WireUnit> {
        Some(unit)
    }

    fn reverse_transform(&mut self, unit: WireUnit) -> Option<WireUnit> {
        if self.ring.is_empty() {
            return Some(unit);
        }
        let previous = self.ring[self.idx].replace(unit);
        self.idx = (self.idx + 1) % self.ring.len();
        previous
    }

    fn close(&mut self) {
        self.ring.iter_mut().for_each(|slot| *slot = None);
        self.idx = 0;
    }
}

impl TransformEngine for DelayLine {
    fn rtp_transformer(&mut self) -> Option<&mut dyn PacketTransformer> {
        match self.flow {
            Flow::Rtp => Some(self),
            Flow::Rtcp => None,
        }
    }

    fn rtcp_transformer(&mut self) -> Option<&mut dyn PacketTransformer> {
        match self.flow {
            Flow::Rtp => None,
            Flow::Rtcp => Some(self),
        }
    }
}
