//! A mutable view over one network datagram.

use bytes::{Bytes, BytesMut};
use shared::error::{Error, Result};
use shared::util::is_rtcp;

/// Fixed part of an RTP header (RFC 3550 section 5.1).
pub const RTP_FIXED_HEADER_LENGTH: usize = 12;
const CSRC_LENGTH: usize = 4;
const EXTENSION_HEADER_LENGTH: usize = 4;

const PADDING_SHIFT: u8 = 5;
const PADDING_MASK: u8 = 0x1;
const EXTENSION_SHIFT: u8 = 4;
const EXTENSION_MASK: u8 = 0x1;
const CC_MASK: u8 = 0xF;
const MARKER_SHIFT: u8 = 7;
const PT_MASK: u8 = 0x7F;

/// One RTP or RTCP datagram travelling through a transform chain.
///
/// The unit owns its buffer and exposes the window `[offset, offset + length)`
/// as the packet. Stages move units along and adjust the window in place; the
/// window never leaves the buffer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WireUnit {
    buffer: BytesMut,
    offset: usize,
    length: usize,
    skip_fec: bool,
}

impl WireUnit {
    /// Wraps a whole buffer.
    pub fn new(buffer: BytesMut) -> Self {
        let length = buffer.len();
        Self {
            buffer,
            offset: 0,
            length,
            skip_fec: false,
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(BytesMut::from(data))
    }

    /// Wraps `buffer` with a window starting at `offset`.
    pub fn with_view(buffer: BytesMut, offset: usize, length: usize) -> Result<Self> {
        let mut unit = Self::new(buffer);
        unit.set_offset_length(offset, length)?;
        Ok(unit)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The whole backing buffer, including bytes outside the window.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// The packet bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.length]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.offset..self.offset + self.length]
    }

    /// Copies the packet bytes out.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }

    /// Consumes the unit and returns the packet bytes.
    pub fn freeze(mut self) -> Bytes {
        let mut view = self.buffer.split_off(self.offset);
        view.truncate(self.length);
        view.freeze()
    }

    /// When set, loss concealment must not use in-band FEC carried by this unit.
    pub fn skip_fec(&self) -> bool {
        self.skip_fec
    }

    pub fn set_skip_fec(&mut self, skip_fec: bool) {
        self.skip_fec = skip_fec;
    }

    /// Moves the window. Fails without touching the unit if the window would
    /// leave the buffer.
    pub fn set_offset_length(&mut self, offset: usize, length: usize) -> Result<()> {
        let end = offset.checked_add(length);
        if end.is_none_or(|end| end > self.buffer.len()) {
            return Err(self.out_of_bounds(offset, length));
        }
        self.offset = offset;
        self.length = length;
        Ok(())
    }

    /// Drops `n` bytes from the end of the window.
    pub fn shrink(&mut self, n: usize) -> Result<()> {
        if n > self.length {
            return Err(self.out_of_bounds(self.offset, n));
        }
        self.length -= n;
        Ok(())
    }

    /// Extends the window by `n` bytes, zero-filling the buffer if it is too
    /// small.
    pub fn grow(&mut self, n: usize) -> Result<()> {
        let length = self
            .length
            .checked_add(n)
            .ok_or_else(|| self.out_of_bounds(self.offset, n))?;
        let end = self
            .offset
            .checked_add(length)
            .ok_or_else(|| self.out_of_bounds(self.offset, length))?;
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.length = length;
        Ok(())
    }

    /// Inserts `data` at position `at` of the window; bytes after `at` move
    /// back and the window grows by `data.len()`.
    pub fn splice(&mut self, at: usize, data: &[u8]) -> Result<()> {
        if at > self.length {
            return Err(self.out_of_bounds(self.offset + at, data.len()));
        }
        let tail = self.buffer.split_off(self.offset + at);
        self.buffer.extend_from_slice(data);
        self.buffer.extend_from_slice(&tail);
        self.length += data.len();
        Ok(())
    }

    /// Replaces the packet bytes with `data`, resizing the window.
    pub fn replace_contents(&mut self, data: &[u8]) {
        let tail = self.buffer.split_off(self.offset + self.length);
        self.buffer.truncate(self.offset);
        self.buffer.extend_from_slice(data);
        self.buffer.extend_from_slice(&tail);
        self.length = data.len();
    }

    /// RFC 5761 demultiplexing of the packet bytes.
    pub fn is_rtcp(&self) -> bool {
        is_rtcp(self.as_bytes())
    }

    fn out_of_bounds(&self, offset: usize, length: usize) -> Error {
        Error::ErrOutOfBounds {
            offset,
            length,
            capacity: self.buffer.len(),
        }
    }

    fn read_u8(&self, at: usize) -> Option<u8> {
        self.as_bytes().get(at).copied()
    }

    fn read_u16(&self, at: usize) -> Option<u16> {
        let b = self.as_bytes().get(at..at + 2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&self, at: usize) -> Option<u32> {
        let b = self.as_bytes().get(at..at + 4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn fixed_header(&self) -> Option<&[u8]> {
        self.as_bytes().get(..RTP_FIXED_HEADER_LENGTH)
    }

    pub fn version(&self) -> Option<u8> {
        self.fixed_header().map(|h| h[0] >> 6)
    }

    pub fn marker(&self) -> Option<bool> {
        self.fixed_header().map(|h| (h[1] >> MARKER_SHIFT) != 0)
    }

    pub fn payload_type(&self) -> Option<u8> {
        self.fixed_header().map(|h| h[1] & PT_MASK)
    }

    pub fn sequence_number(&self) -> Option<u16> {
        self.fixed_header()?;
        self.read_u16(2)
    }

    pub fn timestamp(&self) -> Option<u32> {
        self.fixed_header()?;
        self.read_u32(4)
    }

    pub fn ssrc(&self) -> Option<u32> {
        self.fixed_header()?;
        self.read_u32(8)
    }

    pub fn csrc_count(&self) -> Option<u8> {
        self.fixed_header().map(|h| h[0] & CC_MASK)
    }

    /// Length of the RTP header including CSRCs and the header extension,
    /// or `None` if the declared header does not fit the window.
    pub fn header_length(&self) -> Option<usize> {
        let b0 = self.read_u8(0)?;
        self.fixed_header()?;

        let mut length = RTP_FIXED_HEADER_LENGTH + (b0 & CC_MASK) as usize * CSRC_LENGTH;
        if (b0 >> EXTENSION_SHIFT) & EXTENSION_MASK != 0 {
            let words = self.read_u16(length + 2)? as usize;
            length += EXTENSION_HEADER_LENGTH + words * 4;
        }

        if length > self.length {
            return None;
        }
        Some(length)
    }

    /// Number of padding bytes at the end of the payload.
    pub fn padding_length(&self) -> Option<usize> {
        let b0 = self.read_u8(0)?;
        if (b0 >> PADDING_SHIFT) & PADDING_MASK == 0 {
            return Some(0);
        }
        self.length.checked_sub(1).and_then(|last| self.read_u8(last)).map(usize::from)
    }

    /// Payload offset and length relative to the window.
    pub fn payload_range(&self) -> Option<(usize, usize)> {
        let header_length = self.header_length()?;
        let padding = self.padding_length()?;
        let length = self.length.checked_sub(header_length)?.checked_sub(padding)?;
        Some((header_length, length))
    }

    pub fn payload(&self) -> Option<&[u8]> {
        let (offset, length) = self.payload_range()?;
        self.as_bytes().get(offset..offset + length)
    }

    pub fn set_payload_type(&mut self, payload_type: u8) -> Result<()> {
        if self.length < RTP_FIXED_HEADER_LENGTH {
            return Err(Error::ErrHeaderSizeInsufficient);
        }
        let b1 = &mut self.as_bytes_mut()[1];
        *b1 = (*b1 & !PT_MASK) | (payload_type & PT_MASK);
        Ok(())
    }
}

impl From<Bytes> for WireUnit {
    fn from(bytes: Bytes) -> Self {
        Self::new(BytesMut::from(bytes))
    }
}

impl From<Vec<u8>> for WireUnit {
    fn from(data: Vec<u8>) -> Self {
        Self::new(BytesMut::from(&data[..]))
    }
}
