use bytes::{Buf, Bytes, BytesMut};
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::extended_report::ExtendedReport;
use crate::goodbye::Goodbye;
use crate::header::{FORMAT_REMB, FORMAT_TLN, HEADER_LENGTH, Header, PacketType};
use crate::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use crate::raw_packet::RawPacket;
use crate::receiver_report::ReceiverReport;
use crate::sender_report::SenderReport;
use crate::transport_feedbacks::transport_layer_nack::TransportLayerNack;

const REMB_IDENTIFIER_OFFSET: usize = 12;

/// One RTCP packet out of a compound datagram.
#[derive(Debug, PartialEq, Clone)]
pub enum Packet {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    ExtendedReport(ExtendedReport),
    TransportLayerNack(TransportLayerNack),
    ReceiverEstimatedMaximumBitrate(ReceiverEstimatedMaximumBitrate),
    Goodbye(Goodbye),
    /// Any packet type this crate does not decode (SDES, APP, PLI, ...),
    /// kept verbatim.
    Raw(RawPacket),
}

impl Packet {
    pub fn header(&self) -> Header {
        match self {
            Packet::SenderReport(p) => p.header(),
            Packet::ReceiverReport(p) => p.header(),
            Packet::ExtendedReport(p) => p.header(),
            Packet::TransportLayerNack(p) => p.header(),
            Packet::ReceiverEstimatedMaximumBitrate(p) => p.header(),
            Packet::Goodbye(p) => p.header(),
            Packet::Raw(p) => p.header(),
        }
    }

    /// SSRC of the packet's originator, when the packet type carries one.
    pub fn sender_ssrc(&self) -> Option<u32> {
        match self {
            Packet::SenderReport(p) => Some(p.ssrc),
            Packet::ReceiverReport(p) => Some(p.ssrc),
            Packet::ExtendedReport(p) => Some(p.sender_ssrc),
            Packet::TransportLayerNack(p) => Some(p.sender_ssrc),
            Packet::ReceiverEstimatedMaximumBitrate(p) => Some(p.sender_ssrc),
            Packet::Goodbye(p) => p.sources.first().copied(),
            Packet::Raw(p) => p
                .0
                .get(HEADER_LENGTH..HEADER_LENGTH + 4)
                .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        }
    }

    /// destination_ssrc returns an array of SSRC values that this packet refers to.
    pub fn destination_ssrc(&self) -> Vec<u32> {
        match self {
            Packet::SenderReport(p) => p.destination_ssrc(),
            Packet::ReceiverReport(p) => p.destination_ssrc(),
            Packet::ExtendedReport(p) => p.destination_ssrc(),
            Packet::TransportLayerNack(p) => p.destination_ssrc(),
            Packet::ReceiverEstimatedMaximumBitrate(p) => p.destination_ssrc(),
            Packet::Goodbye(p) => p.destination_ssrc(),
            Packet::Raw(p) => p.destination_ssrc(),
        }
    }
}

impl MarshalSize for Packet {
    fn marshal_size(&self) -> usize {
        match self {
            Packet::SenderReport(p) => p.marshal_size(),
            Packet::ReceiverReport(p) => p.marshal_size(),
            Packet::ExtendedReport(p) => p.marshal_size(),
            Packet::TransportLayerNack(p) => p.marshal_size(),
            Packet::ReceiverEstimatedMaximumBitrate(p) => p.marshal_size(),
            Packet::Goodbye(p) => p.marshal_size(),
            Packet::Raw(p) => p.marshal_size(),
        }
    }
}

impl Marshal for Packet {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Packet::SenderReport(p) => p.marshal_to(buf),
            Packet::ReceiverReport(p) => p.marshal_to(buf),
            Packet::ExtendedReport(p) => p.marshal_to(buf),
            Packet::TransportLayerNack(p) => p.marshal_to(buf),
            Packet::ReceiverEstimatedMaximumBitrate(p) => p.marshal_to(buf),
            Packet::Goodbye(p) => p.marshal_to(buf),
            Packet::Raw(p) => p.marshal_to(buf),
        }
    }
}

impl Unmarshal for Packet {
    /// Decodes exactly one RTCP packet; the buffer must hold that packet and
    /// nothing else.
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let raw = raw_packet.copy_to_bytes(raw_packet.remaining());
        let mut header_buf = raw.clone();
        let h = Header::unmarshal(&mut header_buf)?;

        let in_packet = &mut raw.clone();
        let packet = match h.packet_type {
            PacketType::SenderReport => Packet::SenderReport(SenderReport::unmarshal(in_packet)?),
            PacketType::ReceiverReport => {
                Packet::ReceiverReport(ReceiverReport::unmarshal(in_packet)?)
            }
            PacketType::Goodbye => Packet::Goodbye(Goodbye::unmarshal(in_packet)?),
            PacketType::ExtendedReport => {
                Packet::ExtendedReport(ExtendedReport::unmarshal(in_packet)?)
            }
            PacketType::TransportSpecificFeedback if h.count == FORMAT_TLN => {
                Packet::TransportLayerNack(TransportLayerNack::unmarshal(in_packet)?)
            }
            PacketType::PayloadSpecificFeedback
                if h.count == FORMAT_REMB && is_remb(&raw) =>
            {
                Packet::ReceiverEstimatedMaximumBitrate(
                    ReceiverEstimatedMaximumBitrate::unmarshal(in_packet)?,
                )
            }
            _ => Packet::Raw(RawPacket::unmarshal(in_packet)?),
        };

        Ok(packet)
    }
}

fn is_remb(raw: &[u8]) -> bool {
    raw.get(REMB_IDENTIFIER_OFFSET..REMB_IDENTIFIER_OFFSET + 4) == Some(b"REMB".as_slice())
}

/// Unmarshal takes an entire udp datagram (which may consist of multiple RTCP packets) and
/// returns the unmarshaled packets it contains.
///
/// Every packet must fit its declared length; trailing bytes shorter than a
/// header or a declared length overrunning the datagram is an error.
pub fn unmarshal<B>(raw_data: &mut B) -> Result<Vec<Packet>>
where
    B: Buf,
{
    let mut packets = vec![];

    while raw_data.has_remaining() {
        if raw_data.remaining() < HEADER_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let chunk = raw_data.chunk();
        let words = u16::from_be_bytes([chunk[2], chunk[3]]) as usize;
        let bytes_processed = (words + 1) * 4;
        if bytes_processed > raw_data.remaining() {
            return Err(Error::PacketTooShort);
        }

        let mut in_packet = raw_data.copy_to_bytes(bytes_processed);
        packets.push(Packet::unmarshal(&mut in_packet)?);
    }

    match packets.len() {
        // Empty packet
        0 => Err(Error::InvalidHeader),
        _ => Ok(packets),
    }
}

/// Marshal takes an array of Packets and serializes them to a single buffer
pub fn marshal(packets: &[Packet]) -> Result<Bytes> {
    let length: usize = packets.iter().map(|p| p.marshal_size()).sum();
    let mut out = BytesMut::with_capacity(length);
    out.resize(length, 0);

    let mut offset = 0;
    for p in packets {
        let n = p.marshal_to(&mut out[offset..])?;
        offset += n;
    }

    Ok(out.freeze())
}
