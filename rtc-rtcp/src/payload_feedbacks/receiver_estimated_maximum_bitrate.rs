use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_REMB, HEADER_LENGTH, Header, PacketType, SSRC_LENGTH};

const REMB_OFFSET: usize = 16;
const UNIQUE_IDENTIFIER: [u8; 4] = [b'R', b'E', b'M', b'B'];

/// ReceiverEstimatedMaximumBitrate contains the receiver's estimated maximum bitrate.
/// see: <https://tools.ietf.org/html/draft-alvestrand-rmcat-remb-03>
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P| FMT=15  |   PT=206      |             length            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                  SSRC of packet sender                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                  SSRC of media source                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Unique identifier 'R' 'E' 'M' 'B'                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Num SSRC     | BR Exp    |  BR Mantissa                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   SSRC feedback                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  ...                                                          |
/// ```
#[derive(Debug, PartialEq, Default, Clone)]
pub struct ReceiverEstimatedMaximumBitrate {
    /// SSRC of sender
    pub sender_ssrc: u32,
    /// Estimated maximum bitrate in bits per second
    pub bitrate: f32,
    /// SSRC entries which this packet applies to
    pub ssrcs: Vec<u32>,
}

impl ReceiverEstimatedMaximumBitrate {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_REMB,
            packet_type: PacketType::PayloadSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    /// destination_ssrc returns an array of SSRC values that this packet refers to.
    pub fn destination_ssrc(&self) -> Vec<u32> {
        self.ssrcs.clone()
    }
}

impl MarshalSize for ReceiverEstimatedMaximumBitrate {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + REMB_OFFSET + self.ssrcs.len() * SSRC_LENGTH
    }
}

impl Marshal for ReceiverEstimatedMaximumBitrate {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        const BITRATE_MAX: f32 = 2.417_842_4e24; //0x3FFFFp+63;
        const MANTISSA_MAX: u32 = 0x3FFFF;

        if self.ssrcs.len() > u8::MAX as usize {
            return Err(Error::TooManySources);
        }
        if !self.bitrate.is_finite() || self.bitrate < 0.0 {
            return Err(Error::InvalidBitrate);
        }
        if buf.remaining_mut() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let h = self.header();
        let n = h.marshal_to(buf)?;
        buf = &mut buf[n..];

        buf.put_u32(self.sender_ssrc);
        // media ssrc is always zero for REMB
        buf.put_u32(0);
        buf.put_slice(&UNIQUE_IDENTIFIER);

        // Find the largest power of 2 we can use so the mantissa fits in 18 bits.
        let mut bitrate = self.bitrate.min(BITRATE_MAX);
        let mut exp = 0u32;
        while bitrate >= (1 << 18) as f32 {
            bitrate /= 2.0;
            exp += 1;
        }
        let mantissa = (bitrate.floor() as u32).min(MANTISSA_MAX);

        buf.put_u8(self.ssrcs.len() as u8);
        // 6 bit exponent, 18 bit mantissa
        buf.put_u8(((exp << 2) | (mantissa >> 16)) as u8);
        buf.put_u16(mantissa as u16);

        for ssrc in &self.ssrcs {
            buf.put_u32(*ssrc);
        }

        Ok(self.marshal_size())
    }
}

impl Unmarshal for ReceiverEstimatedMaximumBitrate {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let raw_packet_len = raw_packet.remaining();
        if raw_packet_len < HEADER_LENGTH + REMB_OFFSET {
            return Err(Error::PacketTooShort);
        }

        let h = Header::unmarshal(raw_packet)?;
        if h.packet_type != PacketType::PayloadSpecificFeedback || h.count != FORMAT_REMB {
            return Err(Error::WrongType);
        }

        let sender_ssrc = raw_packet.get_u32();
        let media_ssrc = raw_packet.get_u32();
        if media_ssrc != 0 {
            return Err(Error::SsrcMustBeZero);
        }

        let mut identifier = [0u8; 4];
        raw_packet.copy_to_slice(&mut identifier);
        if identifier != UNIQUE_IDENTIFIER {
            return Err(Error::MissingRembIdentifier);
        }

        let ssrcs_len = raw_packet.get_u8() as usize;

        let b = raw_packet.get_u8();
        let exp = b >> 2;
        let mut mantissa = ((b & 3) as u32) << 16;
        mantissa |= raw_packet.get_u16() as u32;

        let bitrate = (mantissa as f32) * 2f32.powi(exp as i32);

        if h.length as usize * 4 != REMB_OFFSET + ssrcs_len * SSRC_LENGTH
            || raw_packet.remaining() < ssrcs_len * SSRC_LENGTH
        {
            return Err(Error::SsrcNumAndLengthMismatch);
        }

        let mut ssrcs = Vec::with_capacity(ssrcs_len);
        for _ in 0..ssrcs_len {
            ssrcs.push(raw_packet.get_u32());
        }

        if raw_packet.has_remaining() {
            raw_packet.advance(raw_packet.remaining());
        }

        Ok(ReceiverEstimatedMaximumBitrate {
            sender_ssrc,
            bitrate,
            ssrcs,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_receiver_estimated_maximum_bitrate_marshal() {
        let input = ReceiverEstimatedMaximumBitrate {
            sender_ssrc: 1,
            bitrate: 8927168.0,
            ssrcs: vec![1215622422],
        };

        let expected = Bytes::from_static(&[
            143, 206, 0, 5, 0, 0, 0, 1, 0, 0, 0, 0, 82, 69, 77, 66, 1, 26, 32, 223, 72, 116,
            237, 22,
        ]);

        let output = input.marshal().unwrap();
        assert_eq!(output, expected);
    }

    #[test]
    fn test_receiver_estimated_maximum_bitrate_unmarshal() {
        let mut input = Bytes::from_static(&[
            143, 206, 0, 5, 0, 0, 0, 1, 0, 0, 0, 0, 82, 69, 77, 66, 1, 26, 32, 223, 72, 116,
            237, 22,
        ]);

        // mantissa = (26 & 3) << 16 | 32 << 8 | 223 = 139487, exp = 26 >> 2 = 6
        let expected = ReceiverEstimatedMaximumBitrate {
            sender_ssrc: 1,
            bitrate: 8927168.0,
            ssrcs: vec![1215622422],
        };

        let packet = ReceiverEstimatedMaximumBitrate::unmarshal(&mut input).unwrap();
        assert_eq!(packet, expected);
    }

    #[test]
    fn test_receiver_estimated_maximum_bitrate_missing_identifier() {
        let mut input = Bytes::from_static(&[
            143, 206, 0, 5, 0, 0, 0, 1, 0, 0, 0, 0, 82, 69, 77, 67, 1, 26, 32, 223, 72, 116,
            237, 22,
        ]);
        assert_eq!(
            ReceiverEstimatedMaximumBitrate::unmarshal(&mut input),
            Err(Error::MissingRembIdentifier)
        );
    }

    #[test]
    fn test_receiver_estimated_maximum_bitrate_ssrc_count_mismatch() {
        let mut input = Bytes::from_static(&[
            143, 206, 0, 5, 0, 0, 0, 1, 0, 0, 0, 0, 82, 69, 77, 66, 2, 26, 32, 223, 72, 116,
            237, 22,
        ]);
        assert_eq!(
            ReceiverEstimatedMaximumBitrate::unmarshal(&mut input),
            Err(Error::SsrcNumAndLengthMismatch)
        );
    }
}
