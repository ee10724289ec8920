//! Incoming RED stripping stage.

use super::primary_block;
use crate::chain::{PacketTransformer, TransformEngine};
use crate::wire_unit::WireUnit;
use log::{trace, warn};
use shared::error::{Error, Result};

const PADDING_BIT: u8 = 0x20;

/// Builder for the [`RedFilter`].
///
/// # Example
///
/// ```ignore
/// use rtc_transform::{Registry, RedFilterBuilder};
///
/// let chain = Registry::new()
///     .with(RedFilterBuilder::new().with_payload_type(63).build())
///     .build();
/// ```
pub struct RedFilterBuilder {
    payload_type: u8,
}

impl Default for RedFilterBuilder {
    fn default() -> Self {
        Self { payload_type: 63 }
    }
}

impl RedFilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload type negotiated for RED.
    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = payload_type & 0x7f;
        self
    }

    pub fn build(self) -> RedFilter {
        RedFilter {
            payload_type: self.payload_type,
        }
    }
}

/// Replaces incoming RED packets with their primary block, so later stages
/// and the decoder see plain codec payloads. Malformed RED packets are
/// dropped. Outgoing packets are not touched.
pub struct RedFilter {
    payload_type: u8,
}

impl RedFilter {
    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }
}

impl PacketTransformer for RedFilter {
    fn transform(&mut self, unit: WireUnit) -> Option<WireUnit> {
        Some(unit)
    }

    fn reverse_transform(&mut self, unit: WireUnit) -> Option<WireUnit> {
        if unit.payload_type() != Some(self.payload_type) {
            return Some(unit);
        }

        let seq = unit.sequence_number();
        match strip_red(unit) {
            Ok(unit) => Some(unit),
            Err(err) => {
                warn!("dropping RED packet seq={seq:?}: {err}");
                None
            }
        }
    }
}

/// Rewrites a RED packet in place into a plain RTP packet carrying only the
/// primary block.
fn strip_red(mut unit: WireUnit) -> Result<WireUnit> {
    let (payload_offset, payload_length) = unit.payload_range().ok_or(Error::ErrShortPacket)?;
    let primary = primary_block(unit.as_bytes(), payload_offset, payload_length)
        .ok_or(Error::ErrMalformedRed)?;

    let bytes = unit.as_bytes();
    let mut stripped = Vec::with_capacity(payload_offset + primary.length);
    stripped.extend_from_slice(&bytes[..payload_offset]);
    stripped.extend_from_slice(&bytes[primary.offset..primary.offset + primary.length]);
    stripped[0] &= !PADDING_BIT;

    trace!(
        "RED packet seq={:?}: kept primary block pt={} ({} bytes)",
        unit.sequence_number(),
        primary.payload_type,
        primary.length
    );
    unit.replace_contents(&stripped);
    unit.set_payload_type(primary.payload_type)?;
    Ok(unit)
}

impl TransformEngine for RedFilter {
    fn rtp_transformer(&mut self) -> Option<&mut dyn PacketTransformer> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::red::tests::red_payload;
    use crate::wire_unit::tests::rtp_packet;

    #[test]
    fn test_red_filter_keeps_primary_block() {
        let payload = red_payload(&[(111, 960, &[1, 1]), (111, 0, &[2, 2, 2])]);
        let unit = WireUnit::from(rtp_packet(63, 10, 1920, 5, &payload));

        let mut filter = RedFilterBuilder::new().build();
        let out = filter.reverse_transform(unit).unwrap();
        assert_eq!(out.payload_type(), Some(111));
        assert_eq!(out.sequence_number(), Some(10));
        assert_eq!(out.timestamp(), Some(1920));
        assert_eq!(out.payload(), Some(&[2u8, 2, 2][..]));
    }

    #[test]
    fn test_red_filter_ignores_other_payload_types() {
        let unit = WireUnit::from(rtp_packet(111, 10, 0, 5, &[0xff, 0xff]));
        let mut filter = RedFilterBuilder::new().with_payload_type(63).build();
        assert_eq!(filter.reverse_transform(unit.clone()), Some(unit));
    }

    #[test]
    fn test_red_filter_drops_malformed_payload() {
        // F bit set but no final header
        let unit = WireUnit::from(rtp_packet(63, 10, 0, 5, &[0xef, 0, 0, 2]));
        let mut filter = RedFilterBuilder::new().build();
        assert!(filter.reverse_transform(unit).is_none());
    }

    #[test]
    fn test_strip_red_reports_malformed_units() {
        let unit = WireUnit::from(rtp_packet(63, 10, 0, 5, &[0xef, 0, 0, 2]));
        assert_eq!(strip_red(unit).err(), Some(Error::ErrMalformedRed));

        let short = WireUnit::from_slice(&[0x80, 63, 0, 10]);
        assert_eq!(strip_red(short).err(), Some(Error::ErrShortPacket));
    }

    #[test]
    fn test_red_filter_transform_is_identity() {
        let payload = red_payload(&[(111, 960, &[1]), (111, 0, &[2])]);
        let unit = WireUnit::from(rtp_packet(63, 10, 0, 5, &payload));
        let mut filter = RedFilterBuilder::new().build();
        assert_eq!(filter.transform(unit.clone()), Some(unit));
    }
}
