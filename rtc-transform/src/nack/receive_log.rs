use shared::error::{Error, Result};

const HALF_SEQ_SPACE: u16 = 1 << 15;

/// Sliding bitmap of received RTP sequence numbers for one stream.
///
/// The window covers the last `size` sequence numbers up to the highest one
/// seen. `consecutive` is the newest sequence number with nothing missing
/// before it; everything after it up to `highest` is a NACK candidate.
pub(crate) struct ReceiveLog {
    bitmap: Vec<u64>,
    size: u16,
    highest: Option<u16>,
    consecutive: u16,
}

impl ReceiveLog {
    /// `size` must be a power of two in `64..=32768`.
    pub(crate) fn new(size: u16) -> Result<Self> {
        if !size.is_power_of_two() || size < 64 {
            return Err(Error::ErrInvalidReceiveLogSize(size));
        }

        Ok(Self {
            bitmap: vec![0; (size / 64) as usize],
            size,
            highest: None,
            consecutive: 0,
        })
    }

    #[cfg(test)]
    pub(crate) fn size(&self) -> u16 {
        self.size
    }

    pub(crate) fn record(&mut self, seq: u16) {
        let Some(highest) = self.highest else {
            self.mark(seq);
            self.highest = Some(seq);
            self.consecutive = seq;
            return;
        };

        let ahead = seq.wrapping_sub(highest);
        if ahead == 0 {
            return;
        }

        if ahead < HALF_SEQ_SPACE {
            // slots between the old and new highest may still hold bits from
            // the previous lap of the window
            let mut s = highest.wrapping_add(1);
            while s != seq {
                self.unmark(s);
                s = s.wrapping_add(1);
            }
            self.highest = Some(seq);

            if self.consecutive.wrapping_add(1) == seq {
                self.consecutive = seq;
            } else if seq.wrapping_sub(self.consecutive) > self.size {
                self.consecutive = seq.wrapping_sub(self.size);
                self.advance_consecutive();
            }
        } else if self.consecutive.wrapping_add(1) == seq {
            self.consecutive = seq;
            self.advance_consecutive();
        }

        self.mark(seq);
    }

    /// Whether `seq` was received and is still inside the window.
    #[cfg(test)]
    pub(crate) fn contains(&self, seq: u16) -> bool {
        let Some(highest) = self.highest else {
            return false;
        };
        let behind = highest.wrapping_sub(seq);
        behind < HALF_SEQ_SPACE && behind < self.size && self.is_marked(seq)
    }

    /// Missing sequence numbers after `consecutive`, ignoring the newest
    /// `skip_last_n` positions.
    pub(crate) fn missing(&self, skip_last_n: u16) -> Vec<u16> {
        let Some(highest) = self.highest else {
            return vec![];
        };
        let until = highest.wrapping_sub(skip_last_n);
        if until.wrapping_sub(self.consecutive) >= HALF_SEQ_SPACE {
            return vec![];
        }

        let mut missing = vec![];
        let mut s = self.consecutive.wrapping_add(1);
        while s != until.wrapping_add(1) {
            if !self.is_marked(s) {
                missing.push(s);
            }
            s = s.wrapping_add(1);
        }
        missing
    }

    fn slot(&self, seq: u16) -> (usize, u64) {
        let pos = seq % self.size;
        ((pos / 64) as usize, 1u64 << (pos % 64))
    }

    fn mark(&mut self, seq: u16) {
        let (word, bit) = self.slot(seq);
        self.bitmap[word] |= bit;
    }

    fn unmark(&mut self, seq: u16) {
        let (word, bit) = self.slot(seq);
        self.bitmap[word] &= !bit;
    }

    fn is_marked(&self, seq: u16) -> bool {
        let (word, bit) = self.slot(seq);
        self.bitmap[word] & bit != 0
    }

    fn advance_consecutive(&mut self) {
        let Some(highest) = self.highest else {
            return;
        };
        let mut s = self.consecutive.wrapping_add(1);
        while s != highest.wrapping_add(1) && self.is_marked(s) {
            s = s.wrapping_add(1);
        }
        self.consecutive = s.wrapping_sub(1);
    }
}
