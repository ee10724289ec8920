//! RTCP Extended Reports (RFC 3611).
//!
//! Only the VoIP Metrics block is decoded into a typed structure; all other
//! block types are preserved byte-for-byte as [`UnknownReportBlock`] so an
//! XR packet survives a parse/marshal cycle unchanged.

pub mod voip_metrics;

use bytes::{Buf, BufMut, Bytes};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{HEADER_LENGTH, Header, PacketType, SSRC_LENGTH};
pub use voip_metrics::{
    JitterBufferAdaptive, PacketLossConcealment, VoipMetricsReportBlock,
};

pub(crate) const XR_HEADER_LENGTH: usize = 4;

/// BlockType specifies the type of report in a report block
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum BlockType {
    #[default]
    Unknown,
    LossRle,
    DuplicateRle,
    PacketReceiptTimes,
    ReceiverReferenceTime,
    Dlrr,
    StatisticsSummary,
    VoipMetrics,
    Other(u8),
}

impl From<u8> for BlockType {
    fn from(v: u8) -> Self {
        match v {
            0 => BlockType::Unknown,
            1 => BlockType::LossRle,
            2 => BlockType::DuplicateRle,
            3 => BlockType::PacketReceiptTimes,
            4 => BlockType::ReceiverReferenceTime,
            5 => BlockType::Dlrr,
            6 => BlockType::StatisticsSummary,
            7 => BlockType::VoipMetrics,
            other => BlockType::Other(other),
        }
    }
}

impl From<BlockType> for u8 {
    fn from(v: BlockType) -> Self {
        match v {
            BlockType::Unknown => 0,
            BlockType::LossRle => 1,
            BlockType::DuplicateRle => 2,
            BlockType::PacketReceiptTimes => 3,
            BlockType::ReceiverReferenceTime => 4,
            BlockType::Dlrr => 5,
            BlockType::StatisticsSummary => 6,
            BlockType::VoipMetrics => 7,
            BlockType::Other(other) => other,
        }
    }
}

/// XrHeader defines the common fields that must appear at the start
/// of each report block.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct XrHeader {
    pub block_type: BlockType,
    pub type_specific: u8,
    /// Length of the block in 32-bit words minus one, including the header.
    pub block_length: u16,
}

impl MarshalSize for XrHeader {
    fn marshal_size(&self) -> usize {
        XR_HEADER_LENGTH
    }
}

impl Marshal for XrHeader {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < XR_HEADER_LENGTH {
            return Err(Error::BufferTooShort);
        }

        buf.put_u8(self.block_type.into());
        buf.put_u8(self.type_specific);
        buf.put_u16(self.block_length);

        Ok(XR_HEADER_LENGTH)
    }
}

impl Unmarshal for XrHeader {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if raw_packet.remaining() < XR_HEADER_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let block_type: BlockType = raw_packet.get_u8().into();
        let type_specific = raw_packet.get_u8();
        let block_length = raw_packet.get_u16();

        Ok(XrHeader {
            block_type,
            type_specific,
            block_length,
        })
    }
}

/// A report block this crate does not interpret, kept verbatim
/// (header included).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnknownReportBlock {
    pub bytes: Bytes,
}

impl UnknownReportBlock {
    pub fn block_type(&self) -> BlockType {
        self.bytes.first().copied().unwrap_or(0).into()
    }
}

/// One report block inside an [`ExtendedReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportBlock {
    VoipMetrics(VoipMetricsReportBlock),
    Unknown(UnknownReportBlock),
}

impl ReportBlock {
    pub fn block_type(&self) -> BlockType {
        match self {
            ReportBlock::VoipMetrics(_) => BlockType::VoipMetrics,
            ReportBlock::Unknown(b) => b.block_type(),
        }
    }
}

impl MarshalSize for ReportBlock {
    fn marshal_size(&self) -> usize {
        match self {
            ReportBlock::VoipMetrics(b) => b.marshal_size(),
            ReportBlock::Unknown(b) => b.bytes.len(),
        }
    }
}

impl Marshal for ReportBlock {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        match self {
            ReportBlock::VoipMetrics(b) => b.marshal_to(buf),
            ReportBlock::Unknown(b) => {
                if buf.remaining_mut() < b.bytes.len() {
                    return Err(Error::BufferTooShort);
                }
                buf.put(b.bytes.clone());
                Ok(b.bytes.len())
            }
        }
    }
}

/// The ExtendedReport packet is an Implementation of RTCP Extended
/// Reports defined in RFC 3611. It is used to convey detailed
/// information about an RTP stream. Each packet contains one or
/// more report blocks, each of which conveys a different kind of
/// information.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|reserved |   PT=XR=207   |             length            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                              SSRC                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :                         report blocks                         :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct ExtendedReport {
    pub sender_ssrc: u32,
    pub reports: Vec<ReportBlock>,
}

impl ExtendedReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: 0,
            packet_type: PacketType::ExtendedReport,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }

    /// destination_ssrc returns an array of SSRC values that this packet refers to.
    pub fn destination_ssrc(&self) -> Vec<u32> {
        self.voip_metrics().map(|b| b.ssrc).collect()
    }

    /// VoIP metrics blocks carried by this report.
    pub fn voip_metrics(&self) -> impl Iterator<Item = &VoipMetricsReportBlock> {
        self.reports.iter().filter_map(|r| match r {
            ReportBlock::VoipMetrics(b) => Some(b),
            ReportBlock::Unknown(_) => None,
        })
    }
}

impl MarshalSize for ExtendedReport {
    fn marshal_size(&self) -> usize {
        let reps_length: usize = self.reports.iter().map(|r| r.marshal_size()).sum();
        HEADER_LENGTH + SSRC_LENGTH + reps_length
    }
}

impl Marshal for ExtendedReport {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let h = self.header();
        let n = h.marshal_to(buf)?;
        buf = &mut buf[n..];

        buf.put_u32(self.sender_ssrc);

        for report in &self.reports {
            let n = report.marshal_to(buf)?;
            buf = &mut buf[n..];
        }

        Ok(self.marshal_size())
    }
}

impl Unmarshal for ExtendedReport {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let raw_packet_len = raw_packet.remaining();
        if raw_packet_len < HEADER_LENGTH + SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let header = Header::unmarshal(raw_packet)?;
        if header.packet_type != PacketType::ExtendedReport {
            return Err(Error::WrongType);
        }

        let sender_ssrc = raw_packet.get_u32();

        let mut reports = vec![];
        while raw_packet.remaining() >= XR_HEADER_LENGTH {
            let chunk = raw_packet.chunk();
            let block_type: BlockType = chunk[0].into();
            let block_length = u16::from_be_bytes([chunk[2], chunk[3]]) as usize;
            let block_size = (block_length + 1) * 4;
            if block_size > raw_packet.remaining() {
                return Err(Error::PacketTooShort);
            }

            let mut block = raw_packet.copy_to_bytes(block_size);
            let report = match block_type {
                BlockType::VoipMetrics => {
                    ReportBlock::VoipMetrics(VoipMetricsReportBlock::unmarshal(&mut block)?)
                }
                _ => ReportBlock::Unknown(UnknownReportBlock { bytes: block }),
            };
            reports.push(report);
        }

        if raw_packet.has_remaining() {
            raw_packet.advance(raw_packet.remaining());
        }

        Ok(ExtendedReport {
            sender_ssrc,
            reports,
        })
    }
}
