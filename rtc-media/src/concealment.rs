//! Sequence number driven loss concealment.
//!
//! For every incoming audio payload the engine decides whether to decode it
//! normally, to first rebuild the single missing frame before it from in-band
//! FEC, or to have the codec synthesize PLC frames for a short gap. Gaps
//! longer than the configured bound are not concealed; the stream resyncs on
//! the new sequence number.

use crate::codec::Codec;
use crate::frame::{AudioFrame, FrameOrigin};
use log::{debug, trace, warn};
use transform::WireUnit;

/// Builder for the [`LossConcealment`] engine.
pub struct LossConcealmentBuilder {
    max_concealed_frames: u16,
    fec_enabled: bool,
}

impl Default for LossConcealmentBuilder {
    fn default() -> Self {
        Self {
            max_concealed_frames: 10,
            fec_enabled: true,
        }
    }
}

impl LossConcealmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longest gap, in packets, that is concealed.
    pub fn with_max_concealed_frames(mut self, max: u16) -> Self {
        self.max_concealed_frames = max;
        self
    }

    pub fn with_fec(mut self, enabled: bool) -> Self {
        self.fec_enabled = enabled;
        self
    }

    pub fn build(self) -> LossConcealment {
        LossConcealment {
            max_concealed_frames: self.max_concealed_frames,
            fec_enabled: self.fec_enabled,
            state: ConcealmentState::default(),
        }
    }
}

/// Per-stream decode position.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConcealmentState {
    pub last_seq: Option<u16>,
    /// Samples in the last frame produced; 0 until known.
    pub last_frame_size: u32,
    pub last_rtp_timestamp: u32,
}

/// How a sequence number relates to the stream position.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Arrival {
    First,
    InOrder,
    DuplicateOrOld,
    /// That many packets are missing right before this one.
    Lost(u16),
}

impl ConcealmentState {
    /// Packets missing between the last decoded one and `seq`, in 16-bit
    /// wrapping arithmetic.
    pub fn lost_count(&self, seq: u16) -> u16 {
        match self.last_seq {
            Some(last) => seq.wrapping_sub(last).wrapping_sub(1),
            None => 0,
        }
    }

    pub fn classify(&self, seq: u16) -> Arrival {
        let Some(last) = self.last_seq else {
            return Arrival::First;
        };
        match seq.wrapping_sub(last) as i16 {
            d if d <= 0 => Arrival::DuplicateOrOld,
            1 => Arrival::InOrder,
            _ => Arrival::Lost(self.lost_count(seq)),
        }
    }
}

/// Frames produced for one input payload, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcealmentOutput {
    pub arrival: Arrival,
    pub frames: Vec<AudioFrame>,
}

impl ConcealmentOutput {
    /// Concealed, recovered and decoded samples together.
    pub fn total_samples(&self) -> usize {
        self.frames.iter().map(|f| f.len()).sum()
    }

    pub fn concealed_frames(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| f.origin != FrameOrigin::Decoded)
            .count()
    }
}

/// Loss classifier and concealment driver for one audio stream.
pub struct LossConcealment {
    max_concealed_frames: u16,
    fec_enabled: bool,
    state: ConcealmentState,
}

impl LossConcealment {
    pub fn state(&self) -> &ConcealmentState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = ConcealmentState::default();
    }

    /// Processes the RTP packet in `unit`. `None` when the unit is not a
    /// well-formed RTP packet.
    pub fn process_unit<C: Codec + ?Sized>(
        &mut self,
        codec: &mut C,
        unit: &WireUnit,
    ) -> Option<ConcealmentOutput> {
        let seq = unit.sequence_number()?;
        let timestamp = unit.timestamp()?;
        let payload = unit.payload()?;
        Some(self.process(codec, seq, timestamp, payload, unit.skip_fec()))
    }

    pub fn process<C: Codec + ?Sized>(
        &mut self,
        codec: &mut C,
        seq: u16,
        timestamp: u32,
        payload: &[u8],
        skip_fec: bool,
    ) -> ConcealmentOutput {
        let arrival = self.state.classify(seq);
        let mut frames = vec![];

        match arrival {
            Arrival::DuplicateOrOld => {
                trace!("discarding duplicate or old packet seq={seq}");
                return ConcealmentOutput { arrival, frames };
            }
            Arrival::Lost(lost)
                if lost <= self.max_concealed_frames && self.state.last_frame_size > 0 =>
            {
                self.conceal(codec, lost, seq, timestamp, payload, skip_fec, &mut frames);
            }
            Arrival::Lost(lost) => {
                debug!(
                    "not concealing {lost} lost packets before seq={seq} (frame size {})",
                    self.state.last_frame_size
                );
            }
            Arrival::First | Arrival::InOrder => {}
        }

        let frame_size = codec.expected_sample_count(payload);
        match codec.decode(Some(payload), frame_size) {
            Ok(samples) => {
                if !samples.is_empty() {
                    self.state.last_frame_size = samples.len() as u32;
                } else if frame_size > 0 {
                    self.state.last_frame_size = frame_size;
                }
                frames.push(
                    AudioFrame::new(timestamp, samples, FrameOrigin::Decoded)
                        .with_sequence_number(seq),
                );
            }
            Err(err) => warn!("decoding seq={seq} failed: {err}"),
        }
        self.state.last_seq = Some(seq);
        self.state.last_rtp_timestamp = timestamp;

        ConcealmentOutput { arrival, frames }
    }

    /// Fills `lost` frames in front of packet `seq` stamped `timestamp`.
    #[allow(clippy::too_many_arguments)]
    fn conceal<C: Codec + ?Sized>(
        &mut self,
        codec: &mut C,
        lost: u16,
        seq: u16,
        timestamp: u32,
        payload: &[u8],
        skip_fec: bool,
        frames: &mut Vec<AudioFrame>,
    ) {
        let frame_size = self.state.last_frame_size;

        for k in (1..=lost as u32).rev() {
            let ts = timestamp.wrapping_sub(k.wrapping_mul(frame_size));
            let lost_seq = seq.wrapping_sub(k as u16);

            let recovered = if lost == 1 && self.fec_enabled && !skip_fec {
                match codec.decode_fec(payload, frame_size) {
                    Ok(samples) if !samples.is_empty() => Some(samples),
                    Ok(_) => None,
                    Err(err) => {
                        warn!("FEC decode failed: {err}");
                        None
                    }
                }
            } else {
                None
            };

            let frame = match recovered {
                Some(samples) => Some(AudioFrame::new(ts, samples, FrameOrigin::FecRecovered)),
                None => match codec.decode(None, frame_size) {
                    Ok(samples) => Some(AudioFrame::new(ts, samples, FrameOrigin::Concealed)),
                    Err(err) => {
                        warn!("PLC failed: {err}");
                        None
                    }
                },
            };
            if let Some(frame) = frame {
                frames.push(frame.with_sequence_number(lost_seq));
            }

            self.state.last_seq = self.state.last_seq.map(|s| s.wrapping_add(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::error::{Error, Result};

    /// Mock decoder: payload byte 0 is the sample value, frames are 960
    /// samples. FEC returns the value minus one, PLC returns zeros.
    #[derive(Default)]
    struct MockCodec {
        decodes: Vec<Option<u8>>,
        fec_calls: usize,
        fec_empty: bool,
        fail_decode: bool,
    }

    impl Codec for MockCodec {
        fn decode(&mut self, payload: Option<&[u8]>, frame_size: u32) -> Result<Vec<i16>> {
            let value = payload.and_then(|p| p.first().copied());
            self.decodes.push(value);
            if self.fail_decode && payload.is_some() {
                return Err(Error::Codec("corrupt".to_owned()));
            }
            Ok(vec![value.unwrap_or(0) as i16; frame_size as usize])
        }

        fn decode_fec(&mut self, payload: &[u8], expected_frame_size: u32) -> Result<Vec<i16>> {
            self.fec_calls += 1;
            if self.fec_empty {
                return Ok(vec![]);
            }
            Ok(vec![payload[0] as i16 - 1; expected_frame_size as usize])
        }

        fn expected_sample_count(&self, _payload: &[u8]) -> u32 {
            960
        }
    }

    fn feed(engine: &mut LossConcealment, codec: &mut MockCodec, seq: u16) -> ConcealmentOutput {
        engine.process(codec, seq, seq as u32 * 960, &[seq as u8], false)
    }

    #[test]
    fn test_lost_count_wraps() {
        let state = ConcealmentState {
            last_seq: Some(65535),
            ..Default::default()
        };
        assert_eq!(state.lost_count(0), 0);
        assert_eq!(state.classify(0), Arrival::InOrder);

        let state = ConcealmentState {
            last_seq: Some(65533),
            ..Default::default()
        };
        assert_eq!(state.lost_count(0), 2);
        assert_eq!(state.classify(0), Arrival::Lost(2));
        assert_eq!(state.classify(65533), Arrival::DuplicateOrOld);
        assert_eq!(state.classify(65000), Arrival::DuplicateOrOld);
    }

    #[test]
    fn test_single_loss_recovered_with_fec() {
        let mut engine = LossConcealmentBuilder::new().build();
        let mut codec = MockCodec::default();

        assert_eq!(feed(&mut engine, &mut codec, 100).arrival, Arrival::First);
        assert_eq!(feed(&mut engine, &mut codec, 101).arrival, Arrival::InOrder);

        let out = feed(&mut engine, &mut codec, 103);
        assert_eq!(out.arrival, Arrival::Lost(1));
        assert_eq!(codec.fec_calls, 1);
        assert_eq!(out.frames.len(), 2);
        assert_eq!(out.frames[0].origin, FrameOrigin::FecRecovered);
        assert_eq!(out.frames[0].timestamp, 102 * 960);
        assert_eq!(out.frames[0].samples[0], 102);
        assert_eq!(out.frames[0].sequence_number, Some(102));
        assert_eq!(out.frames[1].origin, FrameOrigin::Decoded);
        assert_eq!(out.frames[1].sequence_number, Some(103));
        assert_eq!(out.total_samples(), 1920);
        assert_eq!(engine.state().last_seq, Some(103));
        assert_eq!(engine.state().last_rtp_timestamp, 103 * 960);
    }

    #[test]
    fn test_duplicate_leaves_state_untouched() {
        let mut engine = LossConcealmentBuilder::new().build();
        let mut codec = MockCodec::default();
        feed(&mut engine, &mut codec, 100);
        feed(&mut engine, &mut codec, 101);
        let before = *engine.state();

        let out = feed(&mut engine, &mut codec, 101);
        assert_eq!(out.arrival, Arrival::DuplicateOrOld);
        assert!(out.frames.is_empty());
        assert_eq!(*engine.state(), before);
        assert_eq!(codec.decodes.len(), 2);
    }

    #[test]
    fn test_multi_loss_uses_plc() {
        let mut engine = LossConcealmentBuilder::new().build();
        let mut codec = MockCodec::default();
        feed(&mut engine, &mut codec, 10);

        let out = feed(&mut engine, &mut codec, 14);
        assert_eq!(out.arrival, Arrival::Lost(3));
        assert_eq!(codec.fec_calls, 0);
        assert_eq!(out.concealed_frames(), 3);
        let stamps: Vec<u32> = out.frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(stamps, vec![11 * 960, 12 * 960, 13 * 960, 14 * 960]);
        assert!(out.frames[..3].iter().all(|f| f.origin == FrameOrigin::Concealed));
        let seqs: Vec<Option<u16>> = out.frames.iter().map(|f| f.sequence_number).collect();
        assert_eq!(seqs, vec![Some(11), Some(12), Some(13), Some(14)]);
    }

    #[test]
    fn test_recovered_sequence_number_wraps() {
        let mut engine = LossConcealmentBuilder::new().build();
        let mut codec = MockCodec::default();
        engine.process(&mut codec, 65535, 0, &[9], false);

        let out = engine.process(&mut codec, 1, 1920, &[9], false);
        assert_eq!(out.arrival, Arrival::Lost(1));
        assert_eq!(codec.fec_calls, 1);
        assert_eq!(out.frames[0].origin, FrameOrigin::FecRecovered);
        assert_eq!(out.frames[0].sequence_number, Some(0));
        assert_eq!(out.frames[0].timestamp, 960);
        assert_eq!(out.frames[1].sequence_number, Some(1));
        assert_eq!(engine.state().last_seq, Some(1));
    }

    #[test]
    fn test_fec_skipped_or_empty_falls_back_to_plc() {
        let mut engine = LossConcealmentBuilder::new().build();
        let mut codec = MockCodec::default();
        feed(&mut engine, &mut codec, 1);
        let out = engine.process(&mut codec, 3, 3 * 960, &[3], true);
        assert_eq!(codec.fec_calls, 0);
        assert_eq!(out.frames[0].origin, FrameOrigin::Concealed);

        let mut engine = LossConcealmentBuilder::new().build();
        let mut codec = MockCodec {
            fec_empty: true,
            ..Default::default()
        };
        feed(&mut engine, &mut codec, 1);
        let out = feed(&mut engine, &mut codec, 3);
        assert_eq!(codec.fec_calls, 1);
        assert_eq!(out.frames[0].origin, FrameOrigin::Concealed);

        let mut engine = LossConcealmentBuilder::new().with_fec(false).build();
        let mut codec = MockCodec::default();
        feed(&mut engine, &mut codec, 1);
        feed(&mut engine, &mut codec, 3);
        assert_eq!(codec.fec_calls, 0);
    }

    #[test]
    fn test_large_gap_resyncs() {
        let mut engine = LossConcealmentBuilder::new()
            .with_max_concealed_frames(5)
            .build();
        let mut codec = MockCodec::default();
        feed(&mut engine, &mut codec, 1);

        let out = feed(&mut engine, &mut codec, 20);
        assert_eq!(out.arrival, Arrival::Lost(18));
        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.frames[0].origin, FrameOrigin::Decoded);
        assert_eq!(engine.state().last_seq, Some(20));
    }

    #[test]
    fn test_decode_failure_still_advances() {
        let mut engine = LossConcealmentBuilder::new().build();
        let mut codec = MockCodec {
            fail_decode: true,
            ..Default::default()
        };
        let out = feed(&mut engine, &mut codec, 7);
        assert!(out.frames.is_empty());
        assert_eq!(engine.state().last_seq, Some(7));
        // frame size is still unknown, so the next gap is not concealed
        let out = feed(&mut engine, &mut codec, 9);
        assert_eq!(codec.fec_calls, 0);
        assert!(out.frames.is_empty());
    }

    #[test]
    fn test_process_unit_reads_rtp_fields() {
        let mut raw = vec![0x80, 111, 0x00, 0x05, 0, 0, 0x12, 0xc0, 0, 0, 0, 1];
        raw.push(42);
        let unit = WireUnit::from(raw);

        let mut engine = LossConcealmentBuilder::new().build();
        let mut codec = MockCodec::default();
        let out = engine.process_unit(&mut codec, &unit).unwrap();
        assert_eq!(out.frames[0].timestamp, 4800);
        assert_eq!(out.frames[0].samples[0], 42);
        assert_eq!(engine.state().last_seq, Some(5));

        assert!(engine
            .process_unit(&mut codec, &WireUnit::from_slice(&[0x80]))
            .is_none());
    }
}
