//! Silence insertion for timestamp gaps.
//!
//! Audio sources that stop producing frames (DTX, muted capture, device
//! stalls) leave holes in the RTP timeline. The timeline tracks where the
//! last emitted frame ended, its timestamp plus its duration, and fills holes
//! up to `max_gap` with silence handed out in chunks of at most
//! `max_chunk_samples` per poll. A frame without samples ends where it
//! starts.

use crate::frame::AudioFrame;
use log::{debug, trace};
use std::collections::VecDeque;
use std::time::Duration;

/// Builder for the [`SilenceTimeline`].
pub struct SilenceTimelineBuilder {
    clock_rate: u32,
    sample_rate: u32,
    max_chunk: Duration,
    max_gap: Duration,
}

impl Default for SilenceTimelineBuilder {
    fn default() -> Self {
        Self {
            clock_rate: 48000,
            sample_rate: 48000,
            max_chunk: Duration::from_secs(1),
            max_gap: Duration::from_secs(3),
        }
    }
}

impl SilenceTimelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// RTP clock rate of the frame timestamps.
    pub fn with_clock_rate(mut self, clock_rate: u32) -> Self {
        self.clock_rate = clock_rate;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Longest silence frame returned by one poll.
    pub fn with_max_chunk(mut self, max_chunk: Duration) -> Self {
        self.max_chunk = max_chunk;
        self
    }

    /// Gaps longer than this are not filled.
    pub fn with_max_gap(mut self, max_gap: Duration) -> Self {
        self.max_gap = max_gap;
        self
    }

    pub fn build(self) -> SilenceTimeline {
        let samples = |d: Duration| (d.as_secs_f64() * self.sample_rate as f64).round() as i64;
        SilenceTimeline {
            clock_rate: self.clock_rate.max(1),
            sample_rate: self.sample_rate,
            max_chunk_samples: samples(self.max_chunk).max(1),
            max_gap_samples: samples(self.max_gap),
            last_output_timestamp: None,
            queue: VecDeque::new(),
        }
    }
}

/// Sans-IO gap filler: [`push`](Self::push) frames in, [`poll`](Self::poll)
/// frames and silence out.
pub struct SilenceTimeline {
    clock_rate: u32,
    sample_rate: u32,
    max_chunk_samples: i64,
    max_gap_samples: i64,
    /// End of the last emitted frame in clock units.
    last_output_timestamp: Option<u32>,
    queue: VecDeque<AudioFrame>,
}

impl SilenceTimeline {
    pub fn push(&mut self, frame: AudioFrame) {
        self.queue.push_back(frame);
    }

    pub fn poll(&mut self) -> Option<AudioFrame> {
        let next = self.queue.front()?;

        if let Some(last) = self.last_output_timestamp {
            let gap = self.gap_samples(last, next.timestamp);
            if gap > self.max_gap_samples {
                debug!(
                    "{gap} samples gap before ts={} exceeds the maximum, resyncing",
                    next.timestamp
                );
            } else if gap > 0 {
                let chunk = gap.min(self.max_chunk_samples);
                let advance = self.clock_units(chunk);
                if advance > 0 {
                    trace!("inserting {chunk} samples of silence at ts={last}");
                    self.last_output_timestamp = Some(last.wrapping_add(advance));
                    return Some(AudioFrame::silence(last, chunk as usize));
                }
            }
        }

        let frame = self.queue.pop_front()?;
        let end = frame
            .timestamp
            .wrapping_add(frame.duration(self.clock_rate, self.sample_rate));
        self.last_output_timestamp = Some(end);
        Some(frame)
    }

    pub fn last_output_timestamp(&self) -> Option<u32> {
        self.last_output_timestamp
    }

    pub fn reset(&mut self) {
        self.last_output_timestamp = None;
        self.queue.clear();
    }

    /// Samples between the end of the last output and `timestamp`; negative
    /// when `timestamp` lies before it.
    fn gap_samples(&self, last: u32, timestamp: u32) -> i64 {
        let clock_diff = timestamp.wrapping_sub(last) as i32 as f64;
        (clock_diff * self.sample_rate as f64 / self.clock_rate as f64).round() as i64
    }

    fn clock_units(&self, samples: i64) -> u32 {
        if self.sample_rate == 0 {
            return 0;
        }
        (samples as u64 * self.clock_rate as u64 / self.sample_rate as u64) as u32
    }
}
