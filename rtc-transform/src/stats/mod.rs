//! RTCP statistics engine.
//!
//! Sits on the RTCP sub-flow. Incoming reports, NACKs, REMBs and XRs are
//! dispatched to [`RtcpListener`]s and summarized per source. Outgoing SR/RR
//! reception blocks feed the per-SSRC jitter aggregates, and for audio an XR
//! packet with VoIP metrics is synthesized and spliced into the datagram.

pub(crate) mod stream_stats;
pub(crate) mod xr;

use crate::chain::{PacketTransformer, TransformEngine};
use crate::wire_unit::WireUnit;
use log::{debug, trace, warn};
use rtcp::extended_report::ExtendedReport;
use rtcp::header::declared_packet_size;
use rtcp::packet::{Packet, unmarshal};
use rtcp::reception_report::ReceptionReport;
use rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;
use shared::marshal::Marshal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stream_stats::{StreamStatsSnapshot, StreamStatsTable};
use xr::ReceiveStatistics;

/// Kind of media carried by the session the engine is attached to.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum MediaKind {
    #[default]
    Audio,
    Video,
}

/// Sender information of an SR.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SenderInfo {
    pub ntp_time: u64,
    pub rtp_time: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

/// One reception report block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: u32,
    pub extended_highest_sequence: u32,
    pub jitter: u32,
    pub last_sender_report: u32,
    pub delay_since_last_sender_report: u32,
}

impl From<&ReceptionReport> for FeedbackBlock {
    fn from(r: &ReceptionReport) -> Self {
        Self {
            ssrc: r.ssrc,
            fraction_lost: r.fraction_lost,
            cumulative_lost: r.total_lost,
            extended_highest_sequence: r.last_sequence_number,
            jitter: r.jitter,
            last_sender_report: r.last_sender_report,
            delay_since_last_sender_report: r.delay,
        }
    }
}

/// SR or RR in a form independent of the wire layout.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RtcpReport {
    pub sender_ssrc: u32,
    pub is_sender_report: bool,
    pub sender_info: Option<SenderInfo>,
    pub feedback: Vec<FeedbackBlock>,
}

impl RtcpReport {
    fn from_packet(packet: &Packet) -> Option<Self> {
        match packet {
            Packet::SenderReport(sr) => Some(Self {
                sender_ssrc: sr.ssrc,
                is_sender_report: true,
                sender_info: Some(SenderInfo {
                    ntp_time: sr.ntp_time,
                    rtp_time: sr.rtp_time,
                    packet_count: sr.packet_count,
                    octet_count: sr.octet_count,
                }),
                feedback: sr.reports.iter().map(FeedbackBlock::from).collect(),
            }),
            Packet::ReceiverReport(rr) => Some(Self {
                sender_ssrc: rr.ssrc,
                is_sender_report: false,
                sender_info: None,
                feedback: rr.reports.iter().map(FeedbackBlock::from).collect(),
            }),
            _ => None,
        }
    }
}

/// Sink for incoming RTCP. All methods default to doing nothing.
pub trait RtcpListener: Send + Sync {
    fn rtcp_report_received(&self, _report: &RtcpReport) {}

    fn nack_received(&self, _nack: &TransportLayerNack) {}

    fn remb_received(&self, _bitrate: f32, _ssrcs: &[u32]) {}

    fn xr_received(&self, _xr: &ExtendedReport) {}
}

/// Loss as last reported by the remote end for one of our sources.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemoteLoss {
    pub fraction_lost: u8,
    pub cumulative_lost: u32,
    pub jitter: u32,
}

/// Received RTCP volume from one sender.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RtcpCounters {
    pub packets: u64,
    pub bytes: u64,
}

/// Builder for the [`StatisticsEngine`].
///
/// # Example
///
/// ```ignore
/// use rtc_transform::{MediaKind, Registry, StatisticsEngineBuilder};
///
/// let stats = StatisticsEngineBuilder::new()
///     .with_media_kind(MediaKind::Audio)
///     .with_xr_voip_metrics(true)
///     .with_receive_statistics(receive_stats)
///     .build();
/// let chain = Registry::new().with(stats.clone()).build();
/// ```
#[derive(Default)]
pub struct StatisticsEngineBuilder {
    media_kind: MediaKind,
    xr_voip_metrics: bool,
    receive_statistics: Option<Arc<dyn ReceiveStatistics>>,
    listeners: Vec<Arc<dyn RtcpListener>>,
}

impl StatisticsEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_media_kind(mut self, media_kind: MediaKind) -> Self {
        self.media_kind = media_kind;
        self
    }

    /// Add an XR VoIP metrics packet to outgoing reports (audio only).
    pub fn with_xr_voip_metrics(mut self, enabled: bool) -> Self {
        self.xr_voip_metrics = enabled;
        self
    }

    /// Local receive statistics the XR blocks are computed from.
    pub fn with_receive_statistics(mut self, statistics: Arc<dyn ReceiveStatistics>) -> Self {
        self.receive_statistics = Some(statistics);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn RtcpListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> StatisticsEngine {
        StatisticsEngine {
            state: Arc::new(State {
                media_kind: self.media_kind,
                xr_voip_metrics: self.xr_voip_metrics,
                receive_statistics: self.receive_statistics,
                listeners: RwLock::new(self.listeners),
                streams: Arc::new(StreamStatsTable::new()),
                remote_loss: Mutex::new(HashMap::new()),
                counters: Mutex::new(HashMap::new()),
            }),
        }
    }
}

struct State {
    media_kind: MediaKind,
    xr_voip_metrics: bool,
    receive_statistics: Option<Arc<dyn ReceiveStatistics>>,
    listeners: RwLock<Vec<Arc<dyn RtcpListener>>>,
    streams: Arc<StreamStatsTable>,
    remote_loss: Mutex<HashMap<u32, RemoteLoss>>,
    counters: Mutex<HashMap<u32, RtcpCounters>>,
}

// Poisoned locks are recovered, never skipped.
impl State {
    fn listeners(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn RtcpListener>>> {
        self.listeners.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listeners_mut(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn RtcpListener>>> {
        self.listeners.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remote_loss(&self) -> MutexGuard<'_, HashMap<u32, RemoteLoss>> {
        self.remote_loss.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn counters(&self) -> MutexGuard<'_, HashMap<u32, RtcpCounters>> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The statistics engine. Clones share state, so one clone can sit in the
/// chain while another answers queries.
#[derive(Clone)]
pub struct StatisticsEngine {
    state: Arc<State>,
}

/// Byte size of each RTCP packet of an already parsed datagram.
fn packet_sizes(bytes: &[u8]) -> Vec<usize> {
    let mut sizes = vec![];
    let mut pos = 0;
    while let Some(size) = declared_packet_size(bytes, pos) {
        sizes.push(size);
        pos += size;
    }
    sizes
}

impl StatisticsEngine {
    pub fn media_kind(&self) -> MediaKind {
        self.state.media_kind
    }

    pub fn add_listener(&self, listener: Arc<dyn RtcpListener>) {
        self.state.listeners_mut().push(listener);
    }

    /// Per-source jitter aggregates, shared with the engine.
    pub fn stream_stats(&self) -> Arc<StreamStatsTable> {
        Arc::clone(&self.state.streams)
    }

    pub fn snapshot(&self, ssrc: u32) -> Option<StreamStatsSnapshot> {
        self.state.streams.snapshot(ssrc)
    }

    /// Mean jitter over every report block sent so far.
    pub fn average_jitter(&self) -> f64 {
        self.state.streams.average_jitter()
    }

    /// Forgets everything known about `ssrc`.
    pub fn remove_stream(&self, ssrc: u32) {
        self.state.streams.remove(ssrc);
        self.state.remote_loss().remove(&ssrc);
        self.state.counters().remove(&ssrc);
    }

    pub fn remote_loss(&self, ssrc: u32) -> Option<RemoteLoss> {
        self.state.remote_loss().get(&ssrc).copied()
    }

    pub fn rtcp_counters(&self, sender_ssrc: u32) -> Option<RtcpCounters> {
        self.state.counters().get(&sender_ssrc).copied()
    }

    fn notify<F: Fn(&dyn RtcpListener)>(&self, f: F) {
        for listener in self.state.listeners().iter() {
            f(listener.as_ref());
        }
    }

    fn count(&self, packets: &[Packet], sizes: &[usize]) {
        let mut counters = self.state.counters();
        for (packet, size) in packets.iter().zip(sizes) {
            if let Some(ssrc) = packet.sender_ssrc() {
                let c = counters.entry(ssrc).or_default();
                c.packets += 1;
                c.bytes += *size as u64;
            }
        }
    }

    fn received(&self, packet: &Packet) {
        match packet {
            Packet::SenderReport(_) | Packet::ReceiverReport(_) => {
                let Some(report) = RtcpReport::from_packet(packet) else {
                    return;
                };
                {
                    let mut remote = self.state.remote_loss();
                    for block in &report.feedback {
                        remote.insert(
                            block.ssrc,
                            RemoteLoss {
                                fraction_lost: block.fraction_lost,
                                cumulative_lost: block.cumulative_lost,
                                jitter: block.jitter,
                            },
                        );
                    }
                }
                trace!(
                    "received {} from {} with {} blocks",
                    if report.is_sender_report { "SR" } else { "RR" },
                    report.sender_ssrc,
                    report.feedback.len()
                );
                self.notify(|l| l.rtcp_report_received(&report));
            }
            Packet::TransportLayerNack(nack) => self.notify(|l| l.nack_received(nack)),
            Packet::ReceiverEstimatedMaximumBitrate(remb) => {
                self.notify(|l| l.remb_received(remb.bitrate, &remb.ssrcs))
            }
            Packet::ExtendedReport(xr) => self.notify(|l| l.xr_received(xr)),
            Packet::Goodbye(_) | Packet::Raw(_) => {}
        }
    }

    /// XR to add to an outgoing datagram, with the index of the packet it
    /// goes in front of.
    fn outgoing_xr(&self, packets: &[Packet]) -> Option<(usize, ExtendedReport)> {
        if self.state.media_kind != MediaKind::Audio || !self.state.xr_voip_metrics {
            return None;
        }
        let statistics = self.state.receive_statistics.as_deref()?;

        let (sender_ssrc, sources): (u32, Vec<u32>) = packets.iter().find_map(|p| match p {
            Packet::SenderReport(sr) if !sr.reports.is_empty() => {
                Some((sr.ssrc, sr.reports.iter().map(|r| r.ssrc).collect()))
            }
            Packet::ReceiverReport(rr) if !rr.reports.is_empty() => {
                Some((rr.ssrc, rr.reports.iter().map(|r| r.ssrc).collect()))
            }
            _ => None,
        })?;

        let xr = xr::synthesize(sender_ssrc, &sources, statistics)?;
        Some((xr::insertion_index(packets, sender_ssrc, &sources), xr))
    }
}

impl PacketTransformer for StatisticsEngine {
    fn transform(&mut self, mut unit: WireUnit) -> Option<WireUnit> {
        let packets = match unmarshal(&mut unit.as_bytes()) {
            Ok(packets) => packets,
            Err(err) => {
                warn!("outgoing RTCP not parsed for statistics: {err}");
                return Some(unit);
            }
        };

        for packet in &packets {
            let reports = match packet {
                Packet::SenderReport(sr) => &sr.reports,
                Packet::ReceiverReport(rr) => &rr.reports,
                _ => continue,
            };
            for report in reports {
                self.state.streams.update(report.ssrc, report.jitter);
            }
        }

        if let Some((index, xr)) = self.outgoing_xr(&packets) {
            let at: usize = packet_sizes(unit.as_bytes()).iter().take(index).sum();
            match xr.marshal() {
                Ok(raw) => {
                    if let Err(err) = unit.splice(at, &raw) {
                        warn!("failed to insert XR into outgoing RTCP: {err}");
                    } else {
                        debug!(
                            "inserted XR with {} VoIP metrics blocks at byte {at}",
                            xr.reports.len()
                        );
                    }
                }
                Err(err) => warn!("failed to marshal XR: {err}"),
            }
        }

        Some(unit)
    }

    fn reverse_transform(&mut self, unit: WireUnit) -> Option<WireUnit> {
        let packets = match unmarshal(&mut unit.as_bytes()) {
            Ok(packets) => packets,
            Err(err) => {
                warn!("incoming RTCP not parsed for statistics: {err}");
                return Some(unit);
            }
        };

        self.count(&packets, &packet_sizes(unit.as_bytes()));
        for packet in &packets {
            self.received(packet);
        }

        Some(unit)
    }
}

impl TransformEngine for StatisticsEngine {
    fn rtcp_transformer(&mut self) -> Option<&mut dyn PacketTransformer> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::xr::StreamReceiveStats;
    use bytes::Bytes;
    use rtcp::compound_packet::CompoundPacket;
    use rtcp::goodbye::Goodbye;
    use rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
    use rtcp::receiver_report::ReceiverReport;
    use rtcp::sender_report::SenderReport;
    use shared::marshal::Unmarshal;

    #[derive(Default)]
    struct Recorder {
        reports: Mutex<Vec<RtcpReport>>,
        nacks: Mutex<usize>,
        rembs: Mutex<Vec<(f32, Vec<u32>)>>,
    }

    impl RtcpListener for Recorder {
        fn rtcp_report_received(&self, report: &RtcpReport) {
            self.reports.lock().unwrap().push(report.clone());
        }
        fn nack_received(&self, _nack: &TransportLayerNack) {
            *self.nacks.lock().unwrap() += 1;
        }
        fn remb_received(&self, bitrate: f32, ssrcs: &[u32]) {
            self.rembs.lock().unwrap().push((bitrate, ssrcs.to_vec()));
        }
    }

    struct AllKnown;

    impl ReceiveStatistics for AllKnown {
        fn stream(&self, _ssrc: u32) -> Option<StreamReceiveStats> {
            Some(StreamReceiveStats {
                expected_packets: 100,
                lost_packets: 10,
                ..Default::default()
            })
        }
    }

    fn sr(ssrc: u32, blocks: &[(u32, u32)]) -> Packet {
        Packet::SenderReport(SenderReport {
            ssrc,
            ntp_time: 1,
            rtp_time: 2,
            packet_count: 3,
            octet_count: 4,
            reports: blocks
                .iter()
                .map(|&(ssrc, jitter)| ReceptionReport {
                    ssrc,
                    jitter,
                    fraction_lost: 12,
                    total_lost: 34,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
    }

    fn bye(ssrc: u32) -> Packet {
        Packet::Goodbye(Goodbye {
            sources: vec![ssrc],
            reason: Bytes::new(),
        })
    }

    fn unit_of(packets: Vec<Packet>) -> WireUnit {
        WireUnit::from(CompoundPacket(packets).marshal().unwrap())
    }

    #[test]
    fn test_outgoing_reports_update_stream_stats() {
        let mut engine = StatisticsEngineBuilder::new()
            .with_media_kind(MediaKind::Video)
            .build();

        for jitter in [10, 40, 25] {
            let unit = unit_of(vec![sr(1, &[(5, jitter)])]);
            let out = engine.transform(unit.clone()).unwrap();
            assert_eq!(out, unit);
        }

        let snap = engine.snapshot(5).unwrap();
        assert_eq!(snap.report_count, 3);
        assert_eq!(snap.jitter_sum, 75);
        assert_eq!(snap.min_jitter, 10);
        assert_eq!(snap.max_jitter, 40);
        assert_eq!(engine.average_jitter(), 25.0);

        engine.remove_stream(5);
        assert!(engine.snapshot(5).is_none());
        assert_eq!(engine.average_jitter(), 0.0);
    }

    #[test]
    fn test_xr_inserted_before_matching_bye() {
        let mut engine = StatisticsEngineBuilder::new()
            .with_xr_voip_metrics(true)
            .with_receive_statistics(Arc::new(AllKnown))
            .build();

        let unit = unit_of(vec![sr(1, &[(5, 10)]), bye(1)]);
        let out = engine.transform(unit).unwrap();

        let parsed = CompoundPacket::unmarshal(&mut out.as_bytes()).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(matches!(parsed.packets()[0], Packet::SenderReport(_)));
        let Packet::ExtendedReport(xr) = &parsed.packets()[1] else {
            panic!("expected XR, got {:?}", parsed.packets()[1]);
        };
        assert_eq!(xr.sender_ssrc, 1);
        let block = xr.voip_metrics().next().unwrap();
        assert_eq!(block.ssrc, 5);
        assert_eq!(block.loss_rate, 25);
        assert!(matches!(parsed.packets()[2], Packet::Goodbye(_)));
    }

    #[test]
    fn test_xr_appended_without_bye() {
        let mut engine = StatisticsEngineBuilder::new()
            .with_xr_voip_metrics(true)
            .with_receive_statistics(Arc::new(AllKnown))
            .build();

        let out = engine.transform(unit_of(vec![sr(1, &[(5, 10)])])).unwrap();
        let parsed = CompoundPacket::unmarshal(&mut out.as_bytes()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(matches!(parsed.packets()[1], Packet::ExtendedReport(_)));
    }

    #[test]
    fn test_no_xr_for_video_or_without_blocks() {
        let mut video = StatisticsEngineBuilder::new()
            .with_media_kind(MediaKind::Video)
            .with_xr_voip_metrics(true)
            .with_receive_statistics(Arc::new(AllKnown))
            .build();
        let unit = unit_of(vec![sr(1, &[(5, 10)])]);
        assert_eq!(video.transform(unit.clone()), Some(unit));

        let mut audio = StatisticsEngineBuilder::new()
            .with_xr_voip_metrics(true)
            .with_receive_statistics(Arc::new(AllKnown))
            .build();
        let empty = unit_of(vec![sr(1, &[])]);
        assert_eq!(audio.transform(empty.clone()), Some(empty));
    }

    #[test]
    fn test_incoming_rtcp_dispatch() {
        let recorder = Arc::new(Recorder::default());
        let mut engine = StatisticsEngineBuilder::new().build();
        engine.add_listener(recorder.clone());

        let unit = unit_of(vec![
            Packet::ReceiverReport(ReceiverReport {
                ssrc: 9,
                reports: vec![ReceptionReport {
                    ssrc: 5,
                    fraction_lost: 64,
                    total_lost: 100,
                    jitter: 7,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            Packet::TransportLayerNack(TransportLayerNack {
                sender_ssrc: 9,
                media_ssrc: 5,
                nacks: vec![],
            }),
            Packet::ReceiverEstimatedMaximumBitrate(ReceiverEstimatedMaximumBitrate {
                sender_ssrc: 9,
                bitrate: 1000.0,
                ssrcs: vec![5],
            }),
        ]);
        let total = unit.length() as u64;

        let out = engine.reverse_transform(unit.clone()).unwrap();
        assert_eq!(out, unit);

        let reports = recorder.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].is_sender_report);
        assert_eq!(reports[0].feedback[0].cumulative_lost, 100);
        assert_eq!(*recorder.nacks.lock().unwrap(), 1);
        assert_eq!(*recorder.rembs.lock().unwrap(), vec![(1000.0, vec![5])]);

        assert_eq!(
            engine.remote_loss(5),
            Some(RemoteLoss {
                fraction_lost: 64,
                cumulative_lost: 100,
                jitter: 7
            })
        );
        assert_eq!(
            engine.rtcp_counters(9),
            Some(RtcpCounters {
                packets: 3,
                bytes: total
            })
        );
        // incoming reports do not feed the outgoing jitter aggregates
        assert!(engine.snapshot(5).is_none());
    }

    #[test]
    fn test_unparsable_rtcp_passes_through() {
        let mut engine = StatisticsEngineBuilder::new().build();
        let garbage = WireUnit::from_slice(&[0x80, 0xc8, 0x00, 0x10]);
        assert_eq!(engine.reverse_transform(garbage.clone()), Some(garbage.clone()));
        assert_eq!(engine.transform(garbage.clone()), Some(garbage));
    }

    #[test]
    fn test_poisoned_maps_still_account_and_remove() {
        let mut engine = StatisticsEngineBuilder::new().build();
        let poisoner = engine.clone();
        let _ = std::thread::spawn(move || {
            let _remote = poisoner.state.remote_loss.lock();
            let _counters = poisoner.state.counters.lock();
            panic!("poison both maps");
        })
        .join();
        assert!(engine.state.counters.is_poisoned());

        let rr = unit_of(vec![Packet::ReceiverReport(ReceiverReport {
            ssrc: 9,
            reports: vec![ReceptionReport {
                ssrc: 9,
                jitter: 3,
                ..Default::default()
            }],
            ..Default::default()
        })]);
        engine.reverse_transform(rr).unwrap();
        assert_eq!(engine.rtcp_counters(9).map(|c| c.packets), Some(1));
        assert_eq!(engine.remote_loss(9).map(|r| r.jitter), Some(3));

        engine.remove_stream(9);
        assert!(engine.rtcp_counters(9).is_none());
        assert!(engine.remote_loss(9).is_none());
    }
}
