//! Integration tests for the receive path: RED stripping in a transform
//! chain followed by loss concealment and silence filling.

use rtc_media::{
    AudioFrame, Codec, FrameOrigin, LossConcealmentBuilder, SilenceTimelineBuilder,
};
use shared::error::Result;
use transform::{Flow, RedFilterBuilder, Registry, WireUnit};

// =============================================================================
// Helper Functions
// =============================================================================

const FRAME: u32 = 960;

/// 20 ms frames at 48 kHz; every sample carries the first payload byte.
#[derive(Default)]
struct FlatCodec {
    fec_attempts: Vec<u8>,
}

impl Codec for FlatCodec {
    fn decode(&mut self, payload: Option<&[u8]>, frame_size: u32) -> Result<Vec<i16>> {
        let value = payload.and_then(|p| p.first().copied()).unwrap_or(0);
        Ok(vec![value as i16; frame_size as usize])
    }

    fn decode_fec(&mut self, payload: &[u8], expected_frame_size: u32) -> Result<Vec<i16>> {
        self.fec_attempts.push(payload[0]);
        Ok(vec![-1; expected_frame_size as usize])
    }

    fn expected_sample_count(&self, _payload: &[u8]) -> u32 {
        FRAME
    }

    fn has_native_plc(&self) -> bool {
        true
    }
}

fn red_packet(seq: u16, primary: u8) -> WireUnit {
    let ts = seq as u32 * FRAME;
    let mut raw = vec![0x80, 63];
    raw.extend_from_slice(&seq.to_be_bytes());
    raw.extend_from_slice(&ts.to_be_bytes());
    raw.extend_from_slice(&0x1234_5678u32.to_be_bytes());
    // redundant copy of the previous frame, then the primary block
    raw.extend_from_slice(&[0x80 | 111, (FRAME >> 6) as u8, ((FRAME & 0x3f) << 2) as u8, 1]);
    raw.push(111);
    raw.push(primary.wrapping_sub(1));
    raw.push(primary);
    WireUnit::from(raw)
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_red_stream_with_loss_is_concealed_and_timed() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut chain = Registry::new()
        .with(RedFilterBuilder::new().with_payload_type(63).build())
        .build();
    let mut concealment = LossConcealmentBuilder::new().build();
    let mut codec = FlatCodec::default();
    let mut timeline = SilenceTimelineBuilder::new().build();

    // 3 is lost, 5 and 6 are lost, 4 arrives twice
    for seq in [1u16, 2, 4, 4, 7] {
        let unit = chain
            .reverse_transform(Flow::Rtp, red_packet(seq, seq as u8 * 10))
            .unwrap();
        assert_eq!(unit.payload_type(), Some(111));

        let out = concealment.process_unit(&mut codec, &unit).unwrap();
        for frame in out.frames {
            timeline.push(frame);
        }
    }
    assert_eq!(codec.fec_attempts, vec![40]);

    let frames: Vec<AudioFrame> = std::iter::from_fn(|| timeline.poll()).collect();
    let summary: Vec<(u32, FrameOrigin)> =
        frames.iter().map(|f| (f.timestamp / FRAME, f.origin)).collect();
    assert_eq!(
        summary,
        vec![
            (1, FrameOrigin::Decoded),
            (2, FrameOrigin::Decoded),
            (3, FrameOrigin::FecRecovered),
            (4, FrameOrigin::Decoded),
            (5, FrameOrigin::Concealed),
            (6, FrameOrigin::Concealed),
            (7, FrameOrigin::Decoded),
        ]
    );
    assert_eq!(frames[3].samples[0], 40);
    let seqs: Vec<Option<u16>> = frames.iter().map(|f| f.sequence_number).collect();
    assert_eq!(seqs, (1..=7).map(Some).collect::<Vec<_>>());
    assert_eq!(concealment.state().last_seq, Some(7));
}

#[test]
fn test_unconcealed_gap_is_filled_with_silence() {
    let mut concealment = LossConcealmentBuilder::new()
        .with_max_concealed_frames(2)
        .build();
    let mut codec = FlatCodec::default();
    let mut timeline = SilenceTimelineBuilder::new().build();

    for (seq, ts) in [(10u16, 0u32), (15, 5 * FRAME)] {
        let out = concealment.process(&mut codec, seq, ts, &[1], false);
        for frame in out.frames {
            timeline.push(frame);
        }
    }

    let frames: Vec<AudioFrame> = std::iter::from_fn(|| timeline.poll()).collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[1].origin, FrameOrigin::Silence);
    assert_eq!(frames[1].timestamp, FRAME);
    assert_eq!(frames[1].len(), 4 * FRAME as usize);
    assert_eq!(frames[1].sequence_number, None);
    assert_eq!(frames[2].timestamp, 5 * FRAME);
}
