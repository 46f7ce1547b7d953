use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::signal::{Signal, SignalError};

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),
    #[error("FLAC decode error: {0}")]
    Flac(#[from] claxon::Error),
    #[error("Invalid audio: {0}")]
    Signal(#[from] SignalError),
}

/// File extensions the CLI can decode.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "flac"];

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

pub fn is_supported(path: &Path) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension(path).as_str())
}

/// Expand files and directories into the supported audio files they contain,
/// sorted so batch output order is stable.
pub fn collect_audio_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut audio_files = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path).follow_links(true).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && is_supported(entry.path()) {
                audio_files.push(entry.into_path());
            }
        }
    }
    audio_files.sort();
    audio_files.dedup();
    log::info!("Found {} audio files", audio_files.len());
    audio_files
}

/// Decode an audio file into a mono signal (channels averaged).
pub fn load_signal(path: &Path) -> Result<Signal, DecodeError> {
    match extension(path).as_str() {
        "wav" => load_wav(path),
        "flac" => load_flac(path),
        other => Err(DecodeError::UnsupportedFormat(other.to_string())),
    }
}

/// Scale for signed integer samples of the given bit depth into [-1, 1).
fn int_scale(bits: u32) -> f32 {
    1.0 / (1_i64 << (bits.clamp(1, 32) - 1)) as f32
}

fn load_wav(path: &Path) -> Result<Signal, DecodeError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample as u32);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };
    Ok(Signal::from_interleaved(
        &samples,
        spec.channels as usize,
        spec.sample_rate,
    )?)
}

fn load_flac(path: &Path) -> Result<Signal, DecodeError> {
    let mut reader = claxon::FlacReader::open(path)?;
    let info = reader.streaminfo();
    let scale = int_scale(info.bits_per_sample);
    let samples: Vec<f32> = reader
        .samples()
        .map(|s| s.map(|v| v as f32 * scale))
        .collect::<Result<_, _>>()?;
    Ok(Signal::from_interleaved(
        &samples,
        info.channels as usize,
        info.sample_rate,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tunescope_{}_{}", std::process::id(), name))
    }

    #[test]
    fn stereo_wav_is_downmixed_and_scaled() {
        let path = temp_path("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        {
            let mut writer = hound::WavWriter::create(&path, spec).unwrap();
            for (l, r) in [(16384_i16, 0_i16), (-32768, -32768), (0, 0)] {
                writer.write_sample(l).unwrap();
                writer.write_sample(r).unwrap();
            }
            writer.finalize().unwrap();
        }
        let signal = load_signal(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(signal.sample_rate(), 8000);
        assert_eq!(signal.samples(), &[0.25, -1.0, 0.0]);
    }

    #[test]
    fn float_wav_round_trips() {
        let path = temp_path("float.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        {
            let mut writer = hound::WavWriter::create(&path, spec).unwrap();
            for s in [0.5_f32, -0.25] {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        let signal = load_signal(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(signal.samples(), &[0.5, -0.25]);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            load_signal(Path::new("song.mp3")),
            Err(DecodeError::UnsupportedFormat(ext)) if ext == "mp3"
        ));
        assert!(is_supported(Path::new("a/B.FLAC")));
        assert!(!is_supported(Path::new("notes.txt")));
    }

    #[test]
    fn collects_supported_files_recursively() {
        let dir = temp_path("tree");
        let nested = dir.join("disc1");
        std::fs::create_dir_all(&nested).unwrap();
        for name in ["b.wav", "a.FLAC", "cover.jpg"] {
            std::fs::write(nested.join(name), b"").unwrap();
        }
        std::fs::write(dir.join("notes.txt"), b"").unwrap();

        let found = collect_audio_files(&[dir.clone(), nested.join("b.wav")]);
        std::fs::remove_dir_all(&dir).ok();

        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.FLAC", "b.wav"]);
    }

    #[test]
    fn empty_wav_is_invalid_audio() {
        let path = temp_path("empty.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        hound::WavWriter::create(&path, spec).unwrap().finalize().unwrap();
        let result = load_signal(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(DecodeError::Signal(SignalError::Empty))));
    }
}
