use realfft::RealFftPlanner;

use super::{DspError, Frames, HOP_LENGTH, N_FFT, Pad, Result};

/// Magnitude spectrogram stored frame-major: `frames[t][bin]`.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    frames: Vec<Vec<f32>>,
    n_fft: usize,
    hop: usize,
    sample_rate: u32,
}

impl Spectrogram {
    /// Hann-windowed STFT magnitudes over zero-padded, centered frames.
    pub fn compute(samples: &[f32], sample_rate: u32, n_fft: usize, hop: usize) -> Result<Self> {
        if n_fft < 2 {
            return Err(DspError::TooShort(format!("FFT size {n_fft}")));
        }
        let framer = Frames::centered(samples, n_fft, hop, Pad::Zeros);

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);
        let window = hann_window(n_fft);

        let mut input = fft.make_input_vec();
        let mut spectrum = fft.make_output_vec();
        let mut scratch = fft.make_scratch_vec();
        let mut frames = Vec::with_capacity(framer.len());

        for frame in framer.iter() {
            for (dst, (&s, &w)) in input.iter_mut().zip(frame.iter().zip(&window)) {
                *dst = s * w;
            }
            fft.process_with_scratch(&mut input, &mut spectrum, &mut scratch)
                .map_err(|e| DspError::Fft(format!("{e:?}")))?;
            frames.push(spectrum.iter().map(|c| c.norm()).collect());
        }

        Ok(Self {
            frames,
            n_fft,
            hop,
            sample_rate,
        })
    }

    /// Spectrogram with the crate-wide FFT size and hop.
    pub fn standard(samples: &[f32], sample_rate: u32) -> Result<Self> {
        Self::compute(samples, sample_rate, N_FFT, HOP_LENGTH)
    }

    /// Same geometry as `self`, different magnitudes.
    pub fn with_frames(&self, frames: Vec<Vec<f32>>) -> Self {
        Self {
            frames,
            n_fft: self.n_fft,
            hop: self.hop,
            sample_rate: self.sample_rate,
        }
    }

    pub fn frames(&self) -> &[Vec<f32>] {
        &self.frames
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn num_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames per second.
    pub fn frame_rate(&self) -> f64 {
        self.sample_rate as f64 / self.hop as f64
    }

    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.n_fft as f32
    }

    pub fn frequencies(&self) -> Vec<f32> {
        (0..self.num_bins()).map(|b| self.bin_frequency(b)).collect()
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }
}

/// Periodic Hann window.
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}
