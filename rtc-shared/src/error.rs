use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("already closed")]
    ErrAlreadyClosed,
    #[error("mutex poison: {0}")]
    PoisonError(String),

    //RTCP errors
    /// Packet lost exceeds maximum amount of packets
    /// that can possibly be lost.
    #[error("Invalid total lost count")]
    InvalidTotalLost,
    /// Packet contains an invalid header.
    #[error("Invalid header")]
    InvalidHeader,
    /// First packet in compound must be SR or RR.
    #[error("First packet in compound must be SR or RR")]
    BadFirstPacket,
    /// Packet contains empty compound.
    #[error("Empty compound packet")]
    EmptyCompound,
    /// Too many reports.
    #[error("Too many reports")]
    TooManyReports,
    /// Too many sources.
    #[error("too many sources")]
    TooManySources,
    /// Packet received is too short.
    #[error("Packet too short to be read")]
    PacketTooShort,
    /// Buffer is too short.
    #[error("Buffer too short to be written")]
    BufferTooShort,
    /// Wrong packet type.
    #[error("Wrong packet type")]
    WrongType,
    /// Reason is too long.
    #[error("Reason must be < 255 octets long")]
    ReasonTooLong,
    /// Invalid packet version.
    #[error("Invalid packet version")]
    BadVersion,
    /// Invalid padding value.
    #[error("Invalid padding value")]
    WrongPadding,
    /// Missing REMB identifier.
    #[error("Missing REMB identifier")]
    MissingRembIdentifier,
    /// SSRC number and length mismatches.
    #[error("SSRC num and length do not match")]
    SsrcNumAndLengthMismatch,
    /// Media SSRC must be 0.
    #[error("Media SSRC must be 0")]
    SsrcMustBeZero,
    #[error("Invalid bitrate")]
    InvalidBitrate,
    #[error("Invalid block size")]
    InvalidBlockSize,

    //RTP errors
    #[error("RTP header size insufficient")]
    ErrHeaderSizeInsufficient,
    #[error("packet is not large enough")]
    ErrShortPacket,

    //Wire unit and RED errors
    #[error("offset {offset} + length {length} exceeds buffer of {capacity} bytes")]
    ErrOutOfBounds {
        offset: usize,
        length: usize,
        capacity: usize,
    },
    #[error("malformed RED payload")]
    ErrMalformedRed,

    #[error("invalid receive log size {0}, must be a power of two in 64..=32768")]
    ErrInvalidReceiveLogSize(u16),

    //Media errors
    #[error("codec: {0}")]
    Codec(String),
    #[error("device: {0}")]
    Device(String),

    //Scheduler errors
    #[error("scheduler work panicked")]
    ErrSchedulerPanicked,
    #[error("failed to spawn scheduler thread: {0}")]
    ErrSchedulerSpawn(String),

    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::PoisonError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_bounds_display() {
        let err = Error::ErrOutOfBounds {
            offset: 4,
            length: 10,
            capacity: 12,
        };
        assert_eq!(
            err.to_string(),
            "offset 4 + length 10 exceeds buffer of 12 bytes"
        );
    }
}
