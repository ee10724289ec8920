use bytes::Buf;
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::packet::{Packet, unmarshal};

/// A CompoundPacket is a collection of RTCP packets transmitted as a single packet with
/// the underlying protocol (for example UDP).
///
/// Unlike RFC 3550 section 6.1 this type does not require the first packet to
/// be a report; reduced-size RTCP (RFC 5506) datagrams parse as well. Use
/// [`CompoundPacket::validate`] for the strict check.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct CompoundPacket(pub Vec<Packet>);

impl CompoundPacket {
    /// Validate returns an error if this is not an RFC-compliant CompoundPacket.
    pub fn validate(&self) -> Result<()> {
        let first = self.0.first().ok_or(Error::EmptyCompound)?;
        match first {
            Packet::SenderReport(_) | Packet::ReceiverReport(_) => Ok(()),
            _ => Err(Error::BadFirstPacket),
        }
    }

    pub fn packets(&self) -> &[Packet] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// destination_ssrc returns the SSRCs referenced by any packet in the compound.
    pub fn destination_ssrc(&self) -> Vec<u32> {
        let mut out = vec![];
        for p in &self.0 {
            for ssrc in p.destination_ssrc() {
                if !out.contains(&ssrc) {
                    out.push(ssrc);
                }
            }
        }
        out
    }
}

impl MarshalSize for CompoundPacket {
    fn marshal_size(&self) -> usize {
        self.0.iter().map(|p| p.marshal_size()).sum()
    }
}

impl Marshal for CompoundPacket {
    /// Marshal encodes the CompoundPacket as binary.
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut written = 0;
        for packet in &self.0 {
            let n = packet.marshal_to(buf)?;
            buf = &mut buf[n..];
            written += n;
        }

        Ok(written)
    }
}

impl Unmarshal for CompoundPacket {
    fn unmarshal<B>(raw_data: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        Ok(CompoundPacket(unmarshal(raw_data)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::goodbye::Goodbye;
    use crate::receiver_report::ReceiverReport;
    use crate::sender_report::SenderReport;
    use bytes::Bytes;

    #[test]
    fn test_compound_packet_validate() {
        let cases = vec![
            ("empty", CompoundPacket::default(), Err(Error::EmptyCompound)),
            (
                "bye first",
                CompoundPacket(vec![Packet::Goodbye(Goodbye {
                    sources: vec![1],
                    reason: Bytes::new(),
                })]),
                Err(Error::BadFirstPacket),
            ),
            (
                "rr first",
                CompoundPacket(vec![Packet::ReceiverReport(ReceiverReport::default())]),
                Ok(()),
            ),
        ];

        for (name, packet, want) in cases {
            assert_eq!(packet.validate(), want, "{name}");
        }
    }

    #[test]
    fn test_compound_packet_roundtrip() {
        let cp = CompoundPacket(vec![
            Packet::SenderReport(SenderReport {
                ssrc: 0x1234,
                ntp_time: 1,
                rtp_time: 2,
                packet_count: 3,
                octet_count: 4,
                ..Default::default()
            }),
            Packet::Goodbye(Goodbye {
                sources: vec![0x1234],
                reason: Bytes::from_static(b"bye"),
            }),
        ]);

        let raw = cp.marshal().unwrap();
        let parsed = CompoundPacket::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, cp);
        assert_eq!(parsed.destination_ssrc(), vec![0x1234]);
    }
}
