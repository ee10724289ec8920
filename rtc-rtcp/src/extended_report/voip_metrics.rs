use bytes::{Buf, BufMut};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use super::{BlockType, XrHeader};

pub(crate) const VOIP_METRICS_BLOCK_LENGTH: usize = 36;

/// Value RFC 3611 reserves for metrics the reporter cannot compute
/// (signal/noise level, RERL, R factors, MOS).
pub const METRIC_UNAVAILABLE: u8 = 127;

/// Gmin recommended by RFC 3611 4.7.2 for burst/gap classification.
pub const DEFAULT_GMIN: u8 = 16;

/// Packet loss concealment algorithm advertised in the receiver
/// configuration byte (RFC 3611 4.7.6, bits 7-6).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketLossConcealment {
    #[default]
    Unspecified = 0,
    Disabled = 1,
    Enhanced = 2,
    Standard = 3,
}

impl From<u8> for PacketLossConcealment {
    fn from(b: u8) -> Self {
        match b & 0x03 {
            1 => PacketLossConcealment::Disabled,
            2 => PacketLossConcealment::Enhanced,
            3 => PacketLossConcealment::Standard,
            _ => PacketLossConcealment::Unspecified,
        }
    }
}

/// Jitter buffer adaptive mode (RFC 3611 4.7.6, bits 5-4).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum JitterBufferAdaptive {
    #[default]
    Unknown = 0,
    Reserved = 1,
    NonAdaptive = 2,
    Adaptive = 3,
}

impl From<u8> for JitterBufferAdaptive {
    fn from(b: u8) -> Self {
        match b & 0x03 {
            1 => JitterBufferAdaptive::Reserved,
            2 => JitterBufferAdaptive::NonAdaptive,
            3 => JitterBufferAdaptive::Adaptive,
            _ => JitterBufferAdaptive::Unknown,
        }
    }
}

/// VoIP Metrics Report Block (RFC 3611 4.7)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     BT=7      |   reserved    |       block length = 8        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        SSRC of source                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   loss rate   | discard rate  | burst density |  gap density  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |       burst duration          |         gap duration          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     round trip delay          |       end system delay        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | signal level  |  noise level  |     RERL      |     Gmin      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   R factor    | ext. R factor |    MOS-LQ     |    MOS-CQ     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   RX config   |   reserved    |          JB nominal           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          JB maximum           |          JB abs max           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VoipMetricsReportBlock {
    pub ssrc: u32,
    pub loss_rate: u8,
    pub discard_rate: u8,
    pub burst_density: u8,
    pub gap_density: u8,
    pub burst_duration: u16,
    pub gap_duration: u16,
    pub round_trip_delay: u16,
    pub end_system_delay: u16,
    pub signal_level: u8,
    pub noise_level: u8,
    pub residual_echo_return_loss: u8,
    pub gmin: u8,
    pub r_factor: u8,
    pub ext_r_factor: u8,
    pub mos_lq: u8,
    pub mos_cq: u8,
    pub packet_loss_concealment: PacketLossConcealment,
    pub jitter_buffer_adaptive: JitterBufferAdaptive,
    /// 4-bit jitter buffer adjustment rate.
    pub jitter_buffer_rate: u8,
    pub jb_nominal: u16,
    pub jb_maximum: u16,
    pub jb_abs_max: u16,
}

impl Default for VoipMetricsReportBlock {
    fn default() -> Self {
        VoipMetricsReportBlock {
            ssrc: 0,
            loss_rate: 0,
            discard_rate: 0,
            burst_density: 0,
            gap_density: 0,
            burst_duration: 0,
            gap_duration: 0,
            round_trip_delay: 0,
            end_system_delay: 0,
            signal_level: METRIC_UNAVAILABLE,
            noise_level: METRIC_UNAVAILABLE,
            residual_echo_return_loss: METRIC_UNAVAILABLE,
            gmin: DEFAULT_GMIN,
            r_factor: METRIC_UNAVAILABLE,
            ext_r_factor: METRIC_UNAVAILABLE,
            mos_lq: METRIC_UNAVAILABLE,
            mos_cq: METRIC_UNAVAILABLE,
            packet_loss_concealment: PacketLossConcealment::Unspecified,
            jitter_buffer_adaptive: JitterBufferAdaptive::Unknown,
            jitter_buffer_rate: 0,
            jb_nominal: 0,
            jb_maximum: 0,
            jb_abs_max: 0,
        }
    }
}

impl VoipMetricsReportBlock {
    fn rx_config(&self) -> u8 {
        ((self.packet_loss_concealment as u8) << 6)
            | ((self.jitter_buffer_adaptive as u8) << 4)
            | (self.jitter_buffer_rate & 0x0f)
    }
}

impl MarshalSize for VoipMetricsReportBlock {
    fn marshal_size(&self) -> usize {
        VOIP_METRICS_BLOCK_LENGTH
    }
}

impl Marshal for VoipMetricsReportBlock {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < VOIP_METRICS_BLOCK_LENGTH {
            return Err(Error::BufferTooShort);
        }

        let h = XrHeader {
            block_type: BlockType::VoipMetrics,
            type_specific: 0,
            block_length: (VOIP_METRICS_BLOCK_LENGTH / 4 - 1) as u16,
        };
        let n = h.marshal_to(buf)?;
        buf = &mut buf[n..];

        buf.put_u32(self.ssrc);
        buf.put_u8(self.loss_rate);
        buf.put_u8(self.discard_rate);
        buf.put_u8(self.burst_density);
        buf.put_u8(self.gap_density);
        buf.put_u16(self.burst_duration);
        buf.put_u16(self.gap_duration);
        buf.put_u16(self.round_trip_delay);
        buf.put_u16(self.end_system_delay);
        buf.put_u8(self.signal_level);
        buf.put_u8(self.noise_level);
        buf.put_u8(self.residual_echo_return_loss);
        buf.put_u8(self.gmin);
        buf.put_u8(self.r_factor);
        buf.put_u8(self.ext_r_factor);
        buf.put_u8(self.mos_lq);
        buf.put_u8(self.mos_cq);
        buf.put_u8(self.rx_config());
        buf.put_u8(0);
        buf.put_u16(self.jb_nominal);
        buf.put_u16(self.jb_maximum);
        buf.put_u16(self.jb_abs_max);

        Ok(VOIP_METRICS_BLOCK_LENGTH)
    }
}

impl Unmarshal for VoipMetricsReportBlock {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if raw_packet.remaining() < VOIP_METRICS_BLOCK_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let h = XrHeader::unmarshal(raw_packet)?;
        if h.block_type != BlockType::VoipMetrics {
            return Err(Error::WrongType);
        }
        if (h.block_length as usize + 1) * 4 != VOIP_METRICS_BLOCK_LENGTH {
            return Err(Error::InvalidBlockSize);
        }

        let ssrc = raw_packet.get_u32();
        let loss_rate = raw_packet.get_u8();
        let discard_rate = raw_packet.get_u8();
        let burst_density = raw_packet.get_u8();
        let gap_density = raw_packet.get_u8();
        let burst_duration = raw_packet.get_u16();
        let gap_duration = raw_packet.get_u16();
        let round_trip_delay = raw_packet.get_u16();
        let end_system_delay = raw_packet.get_u16();
        let signal_level = raw_packet.get_u8();
        let noise_level = raw_packet.get_u8();
        let residual_echo_return_loss = raw_packet.get_u8();
        let gmin = raw_packet.get_u8();
        let r_factor = raw_packet.get_u8();
        let ext_r_factor = raw_packet.get_u8();
        let mos_lq = raw_packet.get_u8();
        let mos_cq = raw_packet.get_u8();
        let rx_config = raw_packet.get_u8();
        let _reserved = raw_packet.get_u8();
        let jb_nominal = raw_packet.get_u16();
        let jb_maximum = raw_packet.get_u16();
        let jb_abs_max = raw_packet.get_u16();

        Ok(VoipMetricsReportBlock {
            ssrc,
            loss_rate,
            discard_rate,
            burst_density,
            gap_density,
            burst_duration,
            gap_duration,
            round_trip_delay,
            end_system_delay,
            signal_level,
            noise_level,
            residual_echo_return_loss,
            gmin,
            r_factor,
            ext_r_factor,
            mos_lq,
            mos_cq,
            packet_loss_concealment: PacketLossConcealment::from(rx_config >> 6),
            jitter_buffer_adaptive: JitterBufferAdaptive::from(rx_config >> 4),
            jitter_buffer_rate: rx_config & 0x0f,
            jb_nominal,
            jb_maximum,
            jb_abs_max,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_voip_metrics_rx_config() {
        let block = VoipMetricsReportBlock {
            packet_loss_concealment: PacketLossConcealment::Standard,
            jitter_buffer_adaptive: JitterBufferAdaptive::Adaptive,
            jitter_buffer_rate: 0x1f,
            ..Default::default()
        };
        // rate is truncated to four bits
        assert_eq!(block.rx_config(), 0b1111_1111);

        let block = VoipMetricsReportBlock {
            packet_loss_concealment: PacketLossConcealment::Disabled,
            ..Default::default()
        };
        assert_eq!(block.rx_config(), 0b0100_0000);
    }

    #[test]
    fn test_voip_metrics_roundtrip() {
        let block = VoipMetricsReportBlock {
            ssrc: 0x01020304,
            loss_rate: 12,
            discard_rate: 3,
            burst_density: 200,
            gap_density: 5,
            burst_duration: 120,
            gap_duration: 4000,
            round_trip_delay: 80,
            packet_loss_concealment: PacketLossConcealment::Standard,
            jitter_buffer_adaptive: JitterBufferAdaptive::Adaptive,
            jb_nominal: 60,
            jb_maximum: 120,
            jb_abs_max: 500,
            ..Default::default()
        };

        let raw = block.marshal().unwrap();
        assert_eq!(raw.len(), VOIP_METRICS_BLOCK_LENGTH);
        assert_eq!(raw[0], 7);
        assert_eq!(u16::from_be_bytes([raw[2], raw[3]]), 8);

        let mut buf = raw.clone();
        assert_eq!(VoipMetricsReportBlock::unmarshal(&mut buf).unwrap(), block);
    }
}
