use super::{PacketTransformer, TransformEngine};
use crate::wire_unit::WireUnit;
use bytes::BytesMut;
use log::{debug, warn};
use rtcp::compound_packet::CompoundPacket;
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

/// What an [`RtcpPacketTransformer`] decided for one compound packet.
#[derive(Debug, Clone, PartialEq)]
pub enum RtcpOutcome {
    /// Forward the original bytes.
    Unchanged,
    /// Forward this packet instead.
    Replace(CompoundPacket),
    /// Drop the unit.
    Drop,
}

/// A transformer that works on parsed RTCP instead of bytes. Wrap it in
/// [`RtcpStage`] to put it in a chain.
pub trait RtcpPacketTransformer {
    fn transform(&mut self, _packet: &CompoundPacket) -> RtcpOutcome {
        RtcpOutcome::Unchanged
    }

    fn reverse_transform(&mut self, _packet: &CompoundPacket) -> RtcpOutcome {
        RtcpOutcome::Unchanged
    }

    fn close(&mut self) {}
}

/// Parses each RTCP unit once, hands it to the inner transformer and writes
/// the result back. Units that do not parse pass through.
pub struct RtcpStage<T> {
    inner: T,
}

impl<T: RtcpPacketTransformer> RtcpStage<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    fn apply<F>(&mut self, mut unit: WireUnit, f: F) -> Option<WireUnit>
    where
        F: FnOnce(&mut T, &CompoundPacket) -> RtcpOutcome,
    {
        let packet = match CompoundPacket::unmarshal(&mut unit.as_bytes()) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("passing through unparsable RTCP ({} bytes): {err}", unit.length());
                return Some(unit);
            }
        };

        match f(&mut self.inner, &packet) {
            RtcpOutcome::Unchanged => Some(unit),
            RtcpOutcome::Drop => None,
            RtcpOutcome::Replace(replacement) if replacement.is_empty() => None,
            RtcpOutcome::Replace(replacement) => {
                let mut buf = BytesMut::zeroed(replacement.marshal_size());
                if let Err(err) = replacement.marshal_to(&mut buf) {
                    debug!("dropping RTCP replacement that failed to marshal: {err}");
                    return None;
                }
                unit.replace_contents(&buf);
                Some(unit)
            }
        }
    }
}

impl<T: RtcpPacketTransformer> PacketTransformer for RtcpStage<T> {
    fn transform(&mut self, unit: WireUnit) -> Option<WireUnit> {
        self.apply(unit, |inner, packet| inner.transform(packet))
    }

    fn reverse_transform(&mut self, unit: WireUnit) -> Option<WireUnit> {
        self.apply(unit, |inner, packet| inner.reverse_transform(packet))
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

impl<T: RtcpPacketTransformer> TransformEngine for RtcpStage<T> {
    fn rtcp_transformer(&mut self) -> Option<&mut dyn PacketTransformer> {
        Some(self)
    }
}
