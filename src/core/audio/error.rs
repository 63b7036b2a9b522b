use thiserror::Error;

/// Errors raised by the encoder, decoder and output devices.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Sample rate outside the supported range
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    /// Invalid encoder or pipeline configuration
    #[error("Invalid audio configuration: {0}")]
    InvalidConfiguration(String),

    /// Inbound chunk carried no audio
    #[error("Empty audio payload")]
    EmptyPayload,

    /// Inbound 16-bit PCM payload with an odd number of bytes
    #[error("Malformed PCM payload: {0} bytes is not a whole number of 16-bit samples")]
    MalformedPayload(usize),

    /// Inbound base64 payload could not be decoded
    #[error("Invalid base64 audio payload: {0}")]
    InvalidBase64(String),

    /// Chunk sample rate does not match the output device
    #[error("Sample rate mismatch: chunk is {chunk} Hz, output is {output} Hz")]
    SampleRateMismatch { chunk: u32, output: u32 },

    /// Capture device failure
    #[error("Input device lost: {0}")]
    DeviceLost(String),

    /// WAV rendering failure
    #[error("WAV error: {0}")]
    Wav(String),
}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        AudioError::Wav(err.to_string())
    }
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;
