use shared::error::Result;

/// Audio decoder used by the loss concealment engine.
pub trait Codec {
    /// Decodes `payload` into at most `frame_size` samples. `None` asks the
    /// codec for one frame of packet loss concealment.
    fn decode(&mut self, payload: Option<&[u8]>, frame_size: u32) -> Result<Vec<i16>>;

    /// Recovers the previous frame from the in-band FEC of `payload`. An
    /// empty result means the payload carries no FEC.
    fn decode_fec(&mut self, payload: &[u8], expected_frame_size: u32) -> Result<Vec<i16>>;

    /// Samples `payload` decodes to.
    fn expected_sample_count(&self, payload: &[u8]) -> u32;

    /// Whether the codec conceals loss itself (native FEC/PLC).
    fn has_native_plc(&self) -> bool {
        false
    }
}
