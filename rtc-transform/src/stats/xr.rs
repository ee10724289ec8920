//! RTCP XR VoIP metrics synthesis (RFC 3611 section 4.7).

use rtcp::extended_report::{
    ExtendedReport, JitterBufferAdaptive, PacketLossConcealment, ReportBlock,
    VoipMetricsReportBlock,
};
use rtcp::packet::Packet;

/// Burst/gap metrics as defined by RFC 3611 section 4.7.2.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BurstMetrics {
    pub burst_density: u8,
    pub gap_density: u8,
    /// Milliseconds.
    pub burst_duration: u16,
    /// Milliseconds.
    pub gap_duration: u16,
}

/// Receive side figures for one remote source, gathered by the caller's
/// receive statistics, RTT estimator and jitter buffer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StreamReceiveStats {
    pub expected_packets: u64,
    pub lost_packets: u64,
    pub fec_recovered_packets: u64,
    pub discarded_packets: u64,
    /// Milliseconds.
    pub round_trip_delay: u16,
    /// Milliseconds.
    pub jb_nominal: u16,
    /// Milliseconds.
    pub jb_maximum: u16,
    /// Milliseconds.
    pub jb_abs_max: u16,
    pub jitter_buffer_adaptive: Option<bool>,
    /// The negotiated codec conceals loss itself (native FEC/PLC).
    pub codec_has_native_plc: bool,
    pub burst: Option<BurstMetrics>,
}

/// Source of per-stream receive figures for XR synthesis.
pub trait ReceiveStatistics: Send + Sync {
    fn stream(&self, ssrc: u32) -> Option<StreamReceiveStats>;
}

/// `numerator * 256 / expected`, clamped to a byte.
fn rate(numerator: u64, expected: u64) -> u8 {
    if expected == 0 {
        return 0;
    }
    let r = numerator.saturating_mul(256) / expected;
    r.min(255) as u8
}

/// Builds the VoIP metrics block describing `ssrc`. Metrics the receive
/// statistics cannot supply keep their RFC 3611 "unavailable" values.
pub fn voip_metrics_block(ssrc: u32, stats: &StreamReceiveStats) -> VoipMetricsReportBlock {
    let lost = stats.lost_packets.saturating_sub(stats.fec_recovered_packets);
    let burst = stats.burst.unwrap_or_default();

    VoipMetricsReportBlock {
        ssrc,
        loss_rate: rate(lost, stats.expected_packets),
        discard_rate: rate(stats.discarded_packets, stats.expected_packets),
        burst_density: burst.burst_density,
        gap_density: burst.gap_density,
        burst_duration: burst.burst_duration,
        gap_duration: burst.gap_duration,
        round_trip_delay: stats.round_trip_delay,
        packet_loss_concealment: if stats.codec_has_native_plc {
            PacketLossConcealment::Standard
        } else {
            PacketLossConcealment::Disabled
        },
        jitter_buffer_adaptive: match stats.jitter_buffer_adaptive {
            Some(true) => JitterBufferAdaptive::Adaptive,
            Some(false) => JitterBufferAdaptive::NonAdaptive,
            None => JitterBufferAdaptive::Unknown,
        },
        jb_nominal: stats.jb_nominal,
        jb_maximum: stats.jb_maximum,
        jb_abs_max: stats.jb_abs_max,
        ..Default::default()
    }
}

/// One XR packet from `sender_ssrc` with a VoIP metrics block per source the
/// statistics know about. `None` when no source is known.
pub fn synthesize(
    sender_ssrc: u32,
    sources: &[u32],
    statistics: &dyn ReceiveStatistics,
) -> Option<ExtendedReport> {
    let reports: Vec<ReportBlock> = sources
        .iter()
        .filter_map(|&ssrc| {
            statistics
                .stream(ssrc)
                .map(|s| ReportBlock::VoipMetrics(voip_metrics_block(ssrc, &s)))
        })
        .collect();

    if reports.is_empty() {
        None
    } else {
        Some(ExtendedReport {
            sender_ssrc,
            reports,
        })
    }
}

/// Index of the packet the XR should be inserted before: the first BYE
/// naming the sender or one of the reported sources. `packets.len()` (append)
/// otherwise.
pub fn insertion_index(packets: &[Packet], sender_ssrc: u32, sources: &[u32]) -> usize {
    packets
        .iter()
        .position(|p| match p {
            Packet::Goodbye(bye) => bye
                .sources
                .iter()
                .any(|s| *s == sender_ssrc || sources.contains(s)),
            _ => false,
        })
        .unwrap_or(packets.len())
}
