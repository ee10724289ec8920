/// Where the samples of an [`AudioFrame`] came from.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Decoded from a received payload.
    #[default]
    Decoded,
    /// Rebuilt from in-band FEC carried by the next payload.
    FecRecovered,
    /// Synthesized by the codec's PLC.
    Concealed,
    /// Produced by a capture device.
    Captured,
    /// Inserted to fill a timestamp gap.
    Silence,
}

/// A block of mono PCM samples stamped with its RTP timestamp.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub timestamp: u32,
    /// RTP sequence number the frame stands for, including the ones of lost
    /// packets it replaces. `None` for captured audio and silence.
    pub sequence_number: Option<u16>,
    pub samples: Vec<i16>,
    pub origin: FrameOrigin,
}

impl AudioFrame {
    pub fn new(timestamp: u32, samples: Vec<i16>, origin: FrameOrigin) -> Self {
        Self {
            timestamp,
            sequence_number: None,
            samples,
            origin,
        }
    }

    pub fn with_sequence_number(mut self, seq: u16) -> Self {
        self.sequence_number = Some(seq);
        self
    }

    pub fn silence(timestamp: u32, sample_count: usize) -> Self {
        Self::new(timestamp, vec![0; sample_count], FrameOrigin::Silence)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of the frame in RTP clock units.
    pub fn duration(&self, clock_rate: u32, sample_rate: u32) -> u32 {
        if sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * clock_rate as u64 / sample_rate as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame::silence(0, 960);
        assert_eq!(frame.duration(48000, 48000), 960);
        assert_eq!(frame.duration(8000, 48000), 160);
        assert_eq!(frame.duration(8000, 0), 0);
        assert!(frame.samples.iter().all(|s| *s == 0));
        assert_eq!(frame.origin, FrameOrigin::Silence);
        assert_eq!(frame.sequence_number, None);
        assert_eq!(frame.with_sequence_number(7).sequence_number, Some(7));
    }
}
