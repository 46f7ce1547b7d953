use std::io::Cursor;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Signal contains no samples")]
    Empty,
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),
    #[error("Non-finite sample at index {0}")]
    NonFinite(usize),
    #[error("Channel layout mismatch: {0}")]
    ChannelMismatch(String),
    #[error("WAV render error: {0}")]
    Wav(#[from] hound::Error),
}

/// A decoded mono signal. Construction validates the samples, so every
/// `Signal` that exists is non-empty, finite and single-channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Signal {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self, SignalError> {
        if sample_rate == 0 {
            return Err(SignalError::InvalidSampleRate(sample_rate));
        }
        if samples.is_empty() {
            return Err(SignalError::Empty);
        }
        if let Some(idx) = samples.iter().position(|s| !s.is_finite()) {
            return Err(SignalError::NonFinite(idx));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Downmix interleaved multi-channel audio by averaging the channels of
    /// each frame. A trailing partial frame is an error.
    pub fn from_interleaved(
        interleaved: &[f32],
        channels: usize,
        sample_rate: u32,
    ) -> Result<Self, SignalError> {
        if channels == 0 {
            return Err(SignalError::ChannelMismatch("zero channels".into()));
        }
        if interleaved.len() % channels != 0 {
            return Err(SignalError::ChannelMismatch(format!(
                "{} samples is not a multiple of {} channels",
                interleaved.len(),
                channels
            )));
        }
        if channels == 1 {
            return Self::new(interleaved.to_vec(), sample_rate);
        }
        let mono = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        Self::new(mono, sample_rate)
    }

    /// Downmix planar channels (one Vec per channel) by averaging.
    pub fn from_channels(channels: &[Vec<f32>], sample_rate: u32) -> Result<Self, SignalError> {
        let Some(first) = channels.first() else {
            return Err(SignalError::ChannelMismatch("zero channels".into()));
        };
        let len = first.len();
        if channels.iter().any(|c| c.len() != len) {
            return Err(SignalError::ChannelMismatch(
                "channels have different lengths".into(),
            ));
        }
        let n = channels.len() as f32;
        let mono = (0..len)
            .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() / n)
            .collect();
        Self::new(mono, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false for a constructed signal; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn duration_ms(&self) -> i64 {
        (self.duration_secs() * 1000.0) as i64
    }

    /// Sub-range of the signal between two times in seconds, clamped to the
    /// signal bounds. May be empty.
    pub fn slice_secs(&self, start: f64, end: f64) -> &[f32] {
        let sr = self.sample_rate as f64;
        let lo = ((start.max(0.0) * sr) as usize).min(self.samples.len());
        let hi = ((end.max(0.0) * sr) as usize).clamp(lo, self.samples.len());
        &self.samples[lo..hi]
    }

    /// Render as a 16-bit PCM mono WAV byte stream. Samples outside [-1, 1]
    /// are clipped before quantization.
    pub fn to_pcm16_wav(&self) -> Result<Vec<u8>, SignalError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for &s in &self.samples {
                writer.write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_zero_rate() {
        assert!(matches!(Signal::new(vec![], 22050), Err(SignalError::Empty)));
        assert!(matches!(
            Signal::new(vec![0.0; 10], 0),
            Err(SignalError::InvalidSampleRate(0))
        ));
    }

    #[test]
    fn rejects_non_finite() {
        let err = Signal::new(vec![0.0, f32::NAN, 0.0], 8000).unwrap_err();
        assert!(matches!(err, SignalError::NonFinite(1)));
    }

    #[test]
    fn interleaved_stereo_is_channel_averaged() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let s = Signal::from_interleaved(&stereo, 2, 8000).unwrap();
        assert_eq!(s.samples(), &[0.5, 0.5, 0.0]);
    }

    #[test]
    fn interleaved_partial_frame_is_rejected() {
        let err = Signal::from_interleaved(&[0.0, 0.1, 0.2], 2, 8000).unwrap_err();
        assert!(matches!(err, SignalError::ChannelMismatch(_)));
    }

    #[test]
    fn planar_channels_are_averaged() {
        let s = Signal::from_channels(&[vec![1.0, 1.0], vec![0.0, -1.0]], 100).unwrap();
        assert_eq!(s.samples(), &[0.5, 0.0]);
        assert!(Signal::from_channels(&[vec![1.0], vec![]], 100).is_err());
    }

    #[test]
    fn duration_in_ms() {
        let s = Signal::new(vec![0.0; 22050 * 3 / 2], 22050).unwrap();
        assert_eq!(s.duration_ms(), 1500);
    }

    #[test]
    fn slice_clamps_to_bounds() {
        let s = Signal::new((0..100).map(|i| i as f32 / 100.0).collect(), 10).unwrap();
        assert_eq!(s.slice_secs(1.0, 2.0).len(), 10);
        assert_eq!(s.slice_secs(9.5, 20.0).len(), 5);
        assert!(s.slice_secs(20.0, 30.0).is_empty());
    }

    #[test]
    fn wav_render_is_16bit_mono() {
        let s = Signal::new(vec![0.0, 0.5, 2.0, -2.0], 16000).unwrap();
        let bytes = s.to_pcm16_wav().unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 16000);
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, vec![0, 16383, 32767, -32767]);
    }
}
