//! RFC 2198 redundant audio data (RED).
//!
//! ```text
//!  0                   1                    2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |F|   block PT  |  timestamp offset         |   block length    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+
//! |0|   Block PT  |
//! +-+-+-+-+-+-+-+-+
//! ```
//!
//! Every header with F=1 describes a redundant block and is followed by
//! another header; the single-byte F=0 header describes the primary block,
//! which runs to the end of the payload. Block data follows the headers in
//! header order.

pub(crate) mod filter;

use log::warn;

const F_BIT: u8 = 0x80;
const PT_MASK: u8 = 0x7f;
const EXTENSION_HEADER_LENGTH: usize = 4;
const FINAL_HEADER_LENGTH: usize = 1;
const BLOCK_LENGTH_HIGH_MASK: u8 = 0x03;

/// A block inside a RED payload, addressed by absolute position in the
/// buffer it was found in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RedBlock {
    pub offset: usize,
    pub length: usize,
    pub payload_type: u8,
}

impl RedBlock {
    /// The block data, if it lies inside `buf`.
    pub fn data<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
        buf.get(self.offset..self.offset.checked_add(self.length)?)
    }
}

fn in_bounds(buf: &[u8], off: usize, len: usize) -> bool {
    off.checked_add(len).is_some_and(|end| end <= buf.len())
}

/// Whether the payload carries redundant blocks in addition to the primary.
pub fn is_multi_block(buf: &[u8], off: usize, len: usize) -> bool {
    len > 0 && in_bounds(buf, off, len) && buf[off] & F_BIT != 0
}

/// The primary block, which is the last block of the payload.
pub fn primary_block(buf: &[u8], off: usize, len: usize) -> Option<RedBlock> {
    if len == 0 || !in_bounds(buf, off, len) {
        return None;
    }

    if buf[off] & F_BIT == 0 {
        return Some(RedBlock {
            offset: off + FINAL_HEADER_LENGTH,
            length: len - FINAL_HEADER_LENGTH,
            payload_type: buf[off] & PT_MASK,
        });
    }

    let mut blocks = iterate(buf, off, len);
    let mut primary = None;
    for block in blocks.by_ref() {
        primary = Some(block);
    }
    if blocks.truncated {
        return None;
    }
    primary
}

/// First block, in payload order, accepted by `predicate`.
pub fn match_first<F>(mut predicate: F, buf: &[u8], off: usize, len: usize) -> Option<RedBlock>
where
    F: FnMut(&RedBlock) -> bool,
{
    iterate(buf, off, len).find(|block| predicate(block))
}

/// Lazily walks every block of the payload in order. The iterator ends early
/// if a declared block length overruns the payload.
pub fn iterate(buf: &[u8], off: usize, len: usize) -> RedBlockIterator<'_> {
    let mut it = RedBlockIterator {
        buf,
        header: off,
        data: off,
        end: off,
        done: true,
        truncated: false,
    };

    if len == 0 || !in_bounds(buf, off, len) {
        return it;
    }
    let end = off + len;

    // Block data starts after the last (single byte) header.
    let mut pos = off;
    while pos < end && buf[pos] & F_BIT != 0 {
        pos += EXTENSION_HEADER_LENGTH;
    }
    if pos >= end {
        warn!("RED payload at {off} ({len} bytes) has no final block header");
        it.truncated = true;
        return it;
    }

    it.data = pos + FINAL_HEADER_LENGTH;
    it.end = end;
    it.done = false;
    it
}

/// Iterator returned by [`iterate`].
pub struct RedBlockIterator<'a> {
    buf: &'a [u8],
    header: usize,
    data: usize,
    end: usize,
    done: bool,
    truncated: bool,
}

impl RedBlockIterator<'_> {
    /// True once the iterator stopped on a block that does not fit.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl Iterator for RedBlockIterator<'_> {
    type Item = RedBlock;

    fn next(&mut self) -> Option<RedBlock> {
        if self.done {
            return None;
        }

        let b0 = self.buf[self.header];
        let payload_type = b0 & PT_MASK;

        if b0 & F_BIT == 0 {
            self.done = true;
            return Some(RedBlock {
                offset: self.data,
                length: self.end - self.data,
                payload_type,
            });
        }

        let length = (((self.buf[self.header + 2] & BLOCK_LENGTH_HIGH_MASK) as usize) << 8)
            | self.buf[self.header + 3] as usize;
        if self.data + length > self.end {
            warn!(
                "RED block length {length} at {} overruns payload end {}",
                self.data, self.end
            );
            self.done = true;
            self.truncated = true;
            return None;
        }

        let block = RedBlock {
            offset: self.data,
            length,
            payload_type,
        };
        self.header += EXTENSION_HEADER_LENGTH;
        self.data += length;
        Some(block)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a RED payload from `(payload_type, timestamp_offset, data)`
    /// blocks; the last block is the primary.
    pub(crate) fn red_payload(blocks: &[(u8, u16, &[u8])]) -> Vec<u8> {
        let mut out = vec![];
        let (last, redundant) = blocks.split_last().unwrap();
        for (pt, ts_offset, data) in redundant {
            let len = data.len() as u16;
            out.push(F_BIT | pt);
            out.push((ts_offset >> 6) as u8);
            out.push((((ts_offset & 0x3f) << 2) as u8) | ((len >> 8) as u8 & 0x03));
            out.push(len as u8);
        }
        out.push(last.0 & PT_MASK);
        for (_, _, data) in blocks {
            out.extend_from_slice(data);
        }
        out
    }

    #[test]
    fn test_single_block() {
        let buf = [0xffu8, 111, 1, 2, 3];
        assert!(!is_multi_block(&buf, 1, 4));
        assert_eq!(
            primary_block(&buf, 1, 4),
            Some(RedBlock {
                offset: 2,
                length: 3,
                payload_type: 111
            })
        );
        let blocks: Vec<_> = iterate(&buf, 1, 4).collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(Some(blocks[0]), primary_block(&buf, 1, 4));
        assert_eq!(match_first(|_| true, &buf, 1, 4), Some(blocks[0]));
    }

    #[test]
    fn test_multi_block_primary_is_last() {
        let payload = red_payload(&[(111, 960, &[1, 1]), (111, 480, &[2, 2, 2]), (0, 0, &[3])]);
        let len = payload.len();
        assert!(is_multi_block(&payload, 0, len));

        let blocks: Vec<_> = iterate(&payload, 0, len).collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].data(&payload), Some(&[1u8, 1][..]));
        assert_eq!(blocks[1].data(&payload), Some(&[2u8, 2, 2][..]));
        assert_eq!(blocks[2].data(&payload), Some(&[3u8][..]));
        assert_eq!(blocks[2].payload_type, 0);

        assert_eq!(primary_block(&payload, 0, len), blocks.last().copied());
        assert_eq!(
            match_first(|b| b.payload_type == 0, &payload, 0, len),
            Some(blocks[2])
        );
        assert_eq!(match_first(|b| b.payload_type == 9, &payload, 0, len), None);
    }

    #[test]
    fn test_large_block_length() {
        let data = vec![7u8; 700];
        let payload = red_payload(&[(96, 0, &data), (97, 0, &[1])]);
        let blocks: Vec<_> = iterate(&payload, 0, payload.len()).collect();
        assert_eq!(blocks[0].length, 700);
        assert_eq!(blocks[1].length, 1);
    }

    #[test]
    fn test_truncated_payload_never_panics() {
        let payload = red_payload(&[(111, 960, &[1, 1, 1, 1]), (111, 0, &[2])]);
        // Cut into the redundant block's data.
        let cut = 5 + 2;
        let mut it = iterate(&payload, 0, cut);
        assert_eq!(it.next(), None);
        assert!(it.is_truncated());
        assert_eq!(primary_block(&payload, 0, cut), None);

        // Headers only, no final header.
        assert_eq!(iterate(&payload, 0, 4).count(), 0);
        assert_eq!(primary_block(&payload, 0, 4), None);

        // Window outside the buffer.
        assert!(!is_multi_block(&payload, 4, payload.len()));
        assert_eq!(primary_block(&payload, usize::MAX, 2), None);
        assert_eq!(iterate(&payload, payload.len(), 1).count(), 0);
        assert_eq!(primary_block(&payload, 0, 0), None);
    }
}
