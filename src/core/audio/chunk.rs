use bytes::Bytes;

/// A decoded, playable block of agent speech.
///
/// Produced by the decoder and exclusively owned by the jitter buffer until
/// the scheduler hands it to the output device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Monotonic sequence number within the session
    pub sequence: u64,
    /// Sample rate of `payload` in Hz
    pub sample_rate: u32,
    /// Interleaved channel count of `payload`
    pub channel_count: u16,
    /// Interleaved samples in [-1.0, 1.0]
    pub payload: Vec<f32>,
    /// Output clock time the chunk arrived at the decoder
    pub source_timestamp: f64,
    /// Provider response the chunk belongs to, when the provider tags audio
    pub response_id: Option<String>,
}

impl AudioChunk {
    /// Number of sample frames in the chunk.
    pub fn frames(&self) -> usize {
        if self.channel_count == 0 {
            return 0;
        }
        self.payload.len() / self.channel_count as usize
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// An inbound audio chunk as it arrived on the wire, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct WireAudio {
    /// Sequence number assigned by the provider, if any
    pub sequence: Option<u64>,
    /// 16-bit signed little-endian mono PCM
    pub payload: Bytes,
    /// Sample rate of the payload, when it differs from the negotiated rate
    pub sample_rate: Option<u32>,
    /// Provider response the chunk belongs to
    pub response_id: Option<String>,
}

impl WireAudio {
    /// Raw PCM from a binary frame, with no provider metadata.
    pub fn raw(payload: Bytes) -> Self {
        Self {
            sequence: None,
            payload,
            sample_rate: None,
            response_id: None,
        }
    }
}
