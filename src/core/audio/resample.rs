use super::error::{AudioError, AudioResult};

/// Streaming linear-interpolation resampler for mono audio.
///
/// Unlike a one-shot resampler, the fractional read position and the last
/// input sample carry over between calls, so a signal split into arbitrary
/// blocks resamples without clicks at the block boundaries.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    /// Input samples advanced per output sample
    step: f64,
    /// Read position relative to the start of the next input block.
    /// `-1.0` addresses the last sample of the previous block.
    position: f64,
    last: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> AudioResult<Self> {
        if from_rate == 0 {
            return Err(AudioError::InvalidSampleRate(from_rate));
        }
        if to_rate == 0 {
            return Err(AudioError::InvalidSampleRate(to_rate));
        }

        Ok(Self {
            from_rate,
            to_rate,
            step: from_rate as f64 / to_rate as f64,
            position: 0.0,
            last: None,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Resample `input`, appending the produced samples to `output`.
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        if self.is_passthrough() {
            output.extend_from_slice(input);
            return;
        }
        if input.is_empty() {
            return;
        }

        let len = input.len() as f64;
        output.reserve((len / self.step).ceil() as usize + 1);

        loop {
            let index = self.position.floor();
            // Both interpolation points must be inside this block
            if index + 1.0 > len - 1.0 {
                break;
            }

            let i = index as isize;
            let s0 = if i < 0 {
                self.last.unwrap_or(input[0])
            } else {
                input[i as usize]
            };
            let s1 = input[(i + 1) as usize];
            let frac = (self.position - index) as f32;

            output.push(s0 + frac * (s1 - s0));
            self.position += self.step;
        }

        self.position -= len;
        self.last = input.last().copied();
    }

    /// Forget inter-block state, e.g. when the stream is discontinued.
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.last = None;
    }
}
