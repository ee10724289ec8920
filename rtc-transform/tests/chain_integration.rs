//! Integration tests for transform chains.
//!
//! These tests drive a chain through its sans-IO interface and verify that:
//! - Compound RTCP is split before the RTCP stages see it
//! - Outgoing SR/RR feed the statistics engine and gain an XR packet
//! - Incoming RTCP reaches listeners and termination strategies
//! - RED payloads are stripped on the way in

use bytes::Bytes;
use rtc_transform::{
    DelayLine, Flow, MediaKind, ReceiveStatistics, RedFilterBuilder, Registry, RtcpListener,
    RtcpReport, RtcpTerminationStrategy, StatisticsEngineBuilder, StreamReceiveStats, TaggedUnit,
    TerminationStage, WireUnit,
};
use rtcp::compound_packet::CompoundPacket;
use rtcp::goodbye::Goodbye;
use rtcp::packet::Packet;
use rtcp::receiver_report::ReceiverReport;
use rtcp::reception_report::ReceptionReport;
use rtcp::sender_report::SenderReport;
use sansio::Protocol;
use shared::marshal::{Marshal, Unmarshal};
use std::sync::{Arc, Mutex};
use std::time::Instant;

// =============================================================================
// Helper Functions
// =============================================================================

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn rtp(payload_type: u8, seq: u16, ssrc: u32, payload: &[u8]) -> WireUnit {
    let mut raw = vec![0x80, payload_type & 0x7f];
    raw.extend_from_slice(&seq.to_be_bytes());
    raw.extend_from_slice(&(seq as u32 * 960).to_be_bytes());
    raw.extend_from_slice(&ssrc.to_be_bytes());
    raw.extend_from_slice(payload);
    WireUnit::from(raw)
}

fn report(ssrc: u32, jitter: u32) -> ReceptionReport {
    ReceptionReport {
        ssrc,
        fraction_lost: 10,
        total_lost: 3,
        jitter,
        ..Default::default()
    }
}

fn sender_report(ssrc: u32, reports: Vec<ReceptionReport>) -> Packet {
    Packet::SenderReport(SenderReport {
        ssrc,
        ntp_time: 0xdead_beef_0000_0001,
        rtp_time: 4800,
        packet_count: 10,
        octet_count: 1600,
        reports,
        ..Default::default()
    })
}

fn receiver_report(ssrc: u32, reports: Vec<ReceptionReport>) -> Packet {
    Packet::ReceiverReport(ReceiverReport {
        ssrc,
        reports,
        ..Default::default()
    })
}

fn goodbye(sources: Vec<u32>) -> Packet {
    Packet::Goodbye(Goodbye {
        sources,
        reason: Bytes::new(),
    })
}

fn datagram(packets: Vec<Packet>) -> WireUnit {
    WireUnit::from(CompoundPacket(packets).marshal().unwrap())
}

fn parse(unit: &WireUnit) -> Vec<Packet> {
    CompoundPacket::unmarshal(&mut unit.as_bytes()).unwrap().0
}

struct KnownStreams;

impl ReceiveStatistics for KnownStreams {
    fn stream(&self, ssrc: u32) -> Option<StreamReceiveStats> {
        (ssrc == 2002).then(|| StreamReceiveStats {
            expected_packets: 1000,
            lost_packets: 40,
            fec_recovered_packets: 20,
            round_trip_delay: 80,
            jitter_buffer_adaptive: Some(true),
            codec_has_native_plc: true,
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct Reports(Mutex<Vec<RtcpReport>>);

impl RtcpListener for Reports {
    fn rtcp_report_received(&self, report: &RtcpReport) {
        self.0.lock().unwrap().push(report.clone());
    }
}

// =============================================================================
// Outgoing RTCP
// =============================================================================

#[test]
fn test_outgoing_reports_update_stats_and_gain_xr_before_bye() {
    init_logging();

    let stats = StatisticsEngineBuilder::new()
        .with_media_kind(MediaKind::Audio)
        .with_xr_voip_metrics(true)
        .with_receive_statistics(Arc::new(KnownStreams))
        .build();
    let mut chain = Registry::new().with(stats.clone()).build();

    for jitter in [12, 30] {
        let out = datagram(vec![
            sender_report(1001, vec![report(2002, jitter)]),
            goodbye(vec![1001]),
        ]);
        chain
            .handle_write(TaggedUnit::new(Instant::now(), out))
            .unwrap();

        let sent = chain.poll_write().unwrap().message;
        let packets = parse(&sent);
        assert_eq!(packets.len(), 3);
        assert!(matches!(packets[0], Packet::SenderReport(_)));
        assert!(matches!(packets[2], Packet::Goodbye(_)));

        let Packet::ExtendedReport(xr) = &packets[1] else {
            panic!("expected XR before BYE, got {:?}", packets[1]);
        };
        assert_eq!(xr.sender_ssrc, 1001);
        let block = xr.voip_metrics().next().unwrap();
        assert_eq!(block.ssrc, 2002);
        // (40 - 20) * 256 / 1000
        assert_eq!(block.loss_rate, 5);
        assert_eq!(block.round_trip_delay, 80);
    }

    let snap = stats.snapshot(2002).unwrap();
    assert_eq!(snap.report_count, 2);
    assert_eq!(snap.jitter_sum, 42);
    assert_eq!(snap.min_jitter, 12);
    assert_eq!(snap.max_jitter, 30);
    assert_eq!(stats.average_jitter(), 21.0);
}

#[test]
fn test_outgoing_rtp_untouched_by_rtcp_stages() {
    let stats = StatisticsEngineBuilder::new()
        .with_xr_voip_metrics(true)
        .with_receive_statistics(Arc::new(KnownStreams))
        .build();
    let mut chain = Registry::new()
        .with(stats)
        .with(TerminationStage::new().engine())
        .build();

    let unit = rtp(111, 1, 5, &[1, 2, 3]);
    assert_eq!(chain.transform(Flow::Rtp, unit.clone()), Some(unit));
}

// =============================================================================
// Incoming RTCP
// =============================================================================

#[test]
fn test_incoming_compound_is_split_before_listeners() {
    init_logging();

    let reports = Arc::new(Reports::default());
    let stats = StatisticsEngineBuilder::new()
        .with_listener(reports.clone())
        .build();
    let mut chain = Registry::new()
        .with(stats.clone())
        .with_compound_splitting()
        .build();

    let incoming = datagram(vec![
        receiver_report(7, vec![report(1001, 9)]),
        sender_report(8, vec![]),
        goodbye(vec![8]),
    ]);
    chain
        .handle_read(TaggedUnit::new(Instant::now(), incoming))
        .unwrap();

    let mut units = vec![];
    while let Some(msg) = chain.poll_read() {
        units.push(msg.message);
    }
    assert_eq!(units.len(), 3);
    for unit in &units {
        assert_eq!(parse(unit).len(), 1);
    }

    let seen = reports.0.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].sender_ssrc, 7);
    assert!(!seen[0].is_sender_report);
    assert_eq!(seen[0].feedback[0].jitter, 9);
    assert!(seen[1].is_sender_report);
    assert_eq!(seen[1].sender_info.unwrap().octet_count, 1600);

    assert_eq!(stats.remote_loss(1001).unwrap().cumulative_lost, 3);
    assert_eq!(stats.rtcp_counters(8).unwrap().packets, 2);
}

struct DropGoodbyes;

impl RtcpTerminationStrategy for DropGoodbyes {
    fn reverse_transform(&mut self, packet: &CompoundPacket) -> Option<CompoundPacket> {
        Some(CompoundPacket(
            packet
                .packets()
                .iter()
                .filter(|p| !matches!(p, Packet::Goodbye(_)))
                .cloned()
                .collect(),
        ))
    }
}

#[test]
fn test_termination_runs_network_side_first() {
    let reports = Arc::new(Reports::default());
    let stats = StatisticsEngineBuilder::new()
        .with_listener(reports.clone())
        .build();
    let termination = TerminationStage::with_strategy(Box::new(DropGoodbyes));

    // termination is closest to the network, so incoming RTCP hits it first
    let mut chain = Registry::new()
        .with(stats)
        .with(termination.engine())
        .build();

    let bye_only = datagram(vec![goodbye(vec![3])]);
    assert!(chain.reverse_transform(Flow::Rtcp, bye_only).is_none());

    let mixed = datagram(vec![receiver_report(3, vec![]), goodbye(vec![3])]);
    let out = chain.reverse_transform(Flow::Rtcp, mixed).unwrap();
    assert_eq!(parse(&out), vec![receiver_report(3, vec![])]);
    assert_eq!(reports.0.lock().unwrap().len(), 1);
}

// =============================================================================
// Incoming RTP
// =============================================================================

#[test]
fn test_red_stripped_then_delayed() {
    let mut chain = Registry::new()
        .with(DelayLine::new(Flow::Rtp, 1))
        .with(RedFilterBuilder::new().with_payload_type(63).build())
        .build();

    // one redundant block (pt 111, 4 bytes) plus the primary block
    let red = |seq: u16| {
        let mut payload = vec![0x80 | 111, 0x03, 0xc0, 0x04];
        payload.push(111);
        payload.extend_from_slice(&[0xaa; 4]);
        payload.extend_from_slice(&[seq as u8; 3]);
        rtp(63, seq, 77, &payload)
    };

    chain
        .handle_read(TaggedUnit::new(Instant::now(), red(1)))
        .unwrap();
    assert!(chain.poll_read().is_none());

    chain
        .handle_read(TaggedUnit::new(Instant::now(), red(2)))
        .unwrap();
    let first = chain.poll_read().unwrap().message;
    assert_eq!(first.sequence_number(), Some(1));
    assert_eq!(first.payload_type(), Some(111));
    assert_eq!(first.payload(), Some(&[1u8, 1, 1][..]));
}

#[test]
fn test_closed_chain_rejects_units() {
    let mut chain = Registry::new().build();
    Protocol::close(&mut chain).unwrap();
    assert!(chain.is_closed());
    assert!(
        chain
            .handle_read(TaggedUnit::new(Instant::now(), rtp(111, 1, 1, &[])))
            .is_err()
    );
}
