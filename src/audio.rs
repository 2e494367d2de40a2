use crate::error::{PipelineError, Result};
use hound::{SampleFormat, WavReader};
use regex::Regex;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use tracing::{debug, info};

/// A quiet stretch of audio, in seconds from the start of the file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceInterval {
    pub start: f64,
    pub end: f64,
}

pub trait AudioProbe: Send + Sync {
    fn duration(&self, path: &Path) -> Result<f64>;

    /// Every run quieter than `threshold_db` that lasts at least `min_gap`
    /// seconds, in file order.
    fn silences(&self, path: &Path, threshold_db: f64, min_gap: f64)
    -> Result<Vec<SilenceInterval>>;
}

/// Reads PCM WAV files directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavProbe;

impl AudioProbe for WavProbe {
    fn duration(&self, path: &Path) -> Result<f64> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        let frames = reader.duration() as f64;
        Ok(frames / spec.sample_rate as f64)
    }

    fn silences(
        &self,
        path: &Path,
        threshold_db: f64,
        min_gap: f64,
    ) -> Result<Vec<SilenceInterval>> {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;
        let amplitudes: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(f32::abs))
                .collect::<std::result::Result<_, _>>()?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| (v as f32 / scale).abs()))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let peaks: Vec<f32> = amplitudes
            .chunks(channels)
            .map(|frame| frame.iter().copied().fold(0.0, f32::max))
            .collect();
        Ok(scan_silences(
            &peaks,
            spec.sample_rate as f64,
            threshold_db,
            min_gap,
        ))
    }
}

/// Find quiet runs in a per-frame peak envelope. A run still open at the
/// end of the envelope ends at the total duration.
pub fn scan_silences(
    peaks: &[f32],
    sample_rate: f64,
    threshold_db: f64,
    min_gap: f64,
) -> Vec<SilenceInterval> {
    let threshold = 10f64.powf(threshold_db / 20.0) as f32;
    let min_frames = (min_gap * sample_rate).ceil() as usize;
    let mut intervals = Vec::new();
    let mut run_start: Option<usize> = None;

    let close = |start: usize, end: usize, intervals: &mut Vec<SilenceInterval>| {
        if end - start >= min_frames {
            intervals.push(SilenceInterval {
                start: start as f64 / sample_rate,
                end: end as f64 / sample_rate,
            });
        }
    };

    for (i, &peak) in peaks.iter().enumerate() {
        if peak < threshold {
            run_start.get_or_insert(i);
        } else if let Some(start) = run_start.take() {
            close(start, i, &mut intervals);
        }
    }
    if let Some(start) = run_start {
        close(start, peaks.len(), &mut intervals);
    }
    intervals
}

/// Shells out to ffprobe/ffmpeg; handles any container ffmpeg can decode.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegProbe;

impl AudioProbe for FfmpegProbe {
    fn duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new("ffprobe")
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path)
            .output()?;
        if !output.status.success() {
            return Err(PipelineError::DurationUnmeasurable {
                path: path.to_path_buf(),
                reason: format!("ffprobe exited with {}", output.status),
            });
        }
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<f64>()
            .map_err(|_| PipelineError::DurationUnmeasurable {
                path: path.to_path_buf(),
                reason: format!("unparseable ffprobe output '{}'", text.trim()),
            })
    }

    fn silences(
        &self,
        path: &Path,
        threshold_db: f64,
        min_gap: f64,
    ) -> Result<Vec<SilenceInterval>> {
        let filter = format!("silencedetect=noise={}dB:d={}", threshold_db, min_gap);
        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-nostats", "-i"])
            .arg(path)
            .args(["-af", &filter, "-f", "null", "-"])
            .output()?;
        if !output.status.success() {
            return Err(PipelineError::Io(io::Error::other(format!(
                "ffmpeg silencedetect exited with {}",
                output.status
            ))));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let total = self.duration(path)?;
        Ok(parse_silencedetect(&stderr, total))
    }
}

static SILENCE_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"silence_start:\s*(-?[0-9.]+)").unwrap());
static SILENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"silence_end:\s*(-?[0-9.]+)").unwrap());

/// Parse `silence_start` / `silence_end` lines from ffmpeg's silencedetect
/// log. An unterminated start runs to `total`.
pub fn parse_silencedetect(log: &str, total: f64) -> Vec<SilenceInterval> {
    let mut intervals = Vec::new();
    let mut pending: Option<f64> = None;
    for line in log.lines() {
        if let Some(cap) = SILENCE_START_RE.captures(line) {
            if let Ok(start) = cap[1].parse::<f64>() {
                pending = Some(start.max(0.0));
            }
        } else if let Some(cap) = SILENCE_END_RE.captures(line) {
            if let (Some(start), Ok(end)) = (pending.take(), cap[1].parse::<f64>()) {
                intervals.push(SilenceInterval { start, end });
            }
        }
    }
    if let Some(start) = pending {
        intervals.push(SilenceInterval { start, end: total });
    }
    intervals
}

/// Routes `.wav` files to [`WavProbe`] and everything else to ffmpeg.
#[derive(Debug, Default, Clone, Copy)]
pub struct MediaProbe {
    wav: WavProbe,
    ffmpeg: FfmpegProbe,
}

impl MediaProbe {
    fn pick(&self, path: &Path) -> &dyn AudioProbe {
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if is_wav {
            &self.wav as &dyn AudioProbe
        } else {
            &self.ffmpeg
        }
    }
}

impl AudioProbe for MediaProbe {
    fn duration(&self, path: &Path) -> Result<f64> {
        self.pick(path).duration(path)
    }

    fn silences(
        &self,
        path: &Path,
        threshold_db: f64,
        min_gap: f64,
    ) -> Result<Vec<SilenceInterval>> {
        self.pick(path).silences(path, threshold_db, min_gap)
    }
}

/// Byte-level concatenation of `parts` into `out`. No re-encoding.
pub fn concat_files(parts: &[PathBuf], out: &Path) -> Result<u64> {
    info!("Concatenating {} audio parts into {}", parts.len(), out.display());
    let mut combined = File::create(out).map_err(|e| PipelineError::artifact_write(out, e))?;
    let mut total = 0;
    for part in parts {
        let mut input = File::open(part)?;
        total += io::copy(&mut input, &mut combined)
            .map_err(|e| PipelineError::artifact_write(out, e))?;
        debug!("Appended {}", part.display());
    }
    combined
        .flush()
        .map_err(|e| PipelineError::artifact_write(out, e))?;
    Ok(total)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    pub(crate) const RATE: u32 = 16_000;

    /// Mono 16-bit WAV: `lead` s of silence, `tone` s of a loud sine, then
    /// `tail` s of silence.
    pub(crate) fn write_wav(path: &Path, lead: f64, tone: f64, tail: f64) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        let secs = |s: f64| (s * RATE as f64).round() as usize;
        for _ in 0..secs(lead) {
            writer.write_sample(0i16).unwrap();
        }
        for n in 0..secs(tone) {
            let t = n as f64 / RATE as f64;
            let v = (t * 440.0 * std::f64::consts::TAU).sin();
            writer.write_sample((v * 20_000.0) as i16).unwrap();
        }
        for _ in 0..secs(tail) {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_wav_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_wav(&path, 0.5, 2.0, 0.5);
        let duration = WavProbe.duration(&path).unwrap();
        assert!((duration - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_wav_silences_at_both_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_wav(&path, 0.3, 1.0, 0.6);
        let silences = WavProbe.silences(&path, -30.0, 0.1).unwrap();
        assert_eq!(silences.len(), 2);
        assert!(silences[0].start.abs() < 1e-9);
        assert!((silences[0].end - 0.3).abs() < 1e-3);
        assert!((silences[1].start - 1.3).abs() < 1e-3);
        assert!((silences[1].end - 1.9).abs() < 1e-6);
    }

    #[test]
    fn test_short_gaps_are_ignored() {
        let mut peaks = vec![1.0f32; 100];
        peaks.extend(vec![0.0f32; 5]);
        peaks.extend(vec![1.0f32; 100]);
        assert!(scan_silences(&peaks, 100.0, -30.0, 0.1).is_empty());

        let mut peaks = vec![1.0f32; 100];
        peaks.extend(vec![0.01f32; 10]);
        peaks.extend(vec![1.0f32; 100]);
        let found = scan_silences(&peaks, 100.0, -30.0, 0.1);
        assert_eq!(found, vec![SilenceInterval { start: 1.0, end: 1.1 }]);
    }

    #[test]
    fn test_parse_silencedetect_log() {
        let log = "\
[silencedetect @ 0x1] silence_start: -0.00133
[silencedetect @ 0x1] silence_end: 0.152 | silence_duration: 0.153
size=N/A time=00:00:03.00 bitrate=N/A speed= 200x
[silencedetect @ 0x1] silence_start: 2.61
";
        let found = parse_silencedetect(log, 3.0);
        assert_eq!(
            found,
            vec![
                SilenceInterval { start: 0.0, end: 0.152 },
                SilenceInterval { start: 2.61, end: 3.0 },
            ]
        );
    }

    #[test]
    fn test_concat_is_byte_level() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        std::fs::write(&a, b"ID3aaa").unwrap();
        std::fs::write(&b, b"ID3bb").unwrap();
        let out = dir.path().join("out.mp3");
        let written = concat_files(&[a, b], &out).unwrap();
        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&out).unwrap(), b"ID3aaaID3bb");
    }
}
