use crate::audio::{AudioProbe, SilenceInterval};
use crate::utils::count_words;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{error, warn};

pub const SILENCE_THRESHOLD_DB: f64 = -30.0;
pub const MIN_SILENCE: f64 = 0.1;
const LEADING_EDGE: f64 = 0.05;
const TRAILING_EDGE: f64 = 0.1;

const DURATION_TOLERANCE: f64 = 0.15;
const MAX_LEADING_SILENCE: f64 = 0.2;
const MAX_TRAILING_SILENCE: f64 = 0.5;
const MIN_WORDS_PER_SECOND: f64 = 2.0;
const MAX_WORDS_PER_SECOND: f64 = 4.5;
pub const TARGET_WORDS_PER_SECOND: f64 = 3.0;

/// Hard mismatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Issue {
    DurationUnknown { reason: String },
    DurationMismatch {
        expected: f64,
        actual: f64,
        deviation: f64,
    },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::DurationUnknown { reason } => write!(f, "duration unknown ({})", reason),
            Issue::DurationMismatch {
                expected,
                actual,
                deviation,
            } => write!(
                f,
                "duration {:.2}s vs expected {:.2}s ({:.0}% off)",
                actual,
                expected,
                deviation * 100.0
            ),
        }
    }
}

/// Soft mismatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Warning {
    LeadingSilence { seconds: f64 },
    TrailingSilence { seconds: f64 },
    SpeakingRate { rate: f64 },
    NoSpeech,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::LeadingSilence { seconds } => write!(
                f,
                "leading silence {:.0}ms (max {:.0}ms)",
                seconds * 1000.0,
                MAX_LEADING_SILENCE * 1000.0
            ),
            Warning::TrailingSilence { seconds } => write!(
                f,
                "trailing silence {:.0}ms (max {:.0}ms)",
                seconds * 1000.0,
                MAX_TRAILING_SILENCE * 1000.0
            ),
            Warning::SpeakingRate { rate } => write!(
                f,
                "speaking rate {:.2} words/s outside [{}, {}] (target {})",
                rate, MIN_WORDS_PER_SECOND, MAX_WORDS_PER_SECOND, TARGET_WORDS_PER_SECOND
            ),
            Warning::NoSpeech => write!(f, "no speech detected outside silence"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "PASS",
            Verdict::Warn => "WARN",
            Verdict::Fail => "FAIL",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub actual_duration: Option<f64>,
    pub words_per_second: Option<f64>,
    pub leading_silence: Option<f64>,
    pub trailing_silence: Option<f64>,
    pub issues: Vec<Issue>,
    pub warnings: Vec<Warning>,
}

impl ValidationResult {
    pub fn verdict(&self) -> Verdict {
        if !self.issues.is_empty() {
            Verdict::Fail
        } else if !self.warnings.is_empty() {
            Verdict::Warn
        } else {
            Verdict::Pass
        }
    }

    pub fn log(&self, scene_id: &str) {
        for issue in &self.issues {
            error!("Scene {}: {}", scene_id, issue);
        }
        for warning in &self.warnings {
            warn!("Scene {}: {}", scene_id, warning);
        }
    }
}

/// Leading and trailing silence implied by `silences` in a file of
/// `total` seconds.
pub fn edge_silence(total: f64, silences: &[SilenceInterval]) -> (f64, f64) {
    let leading = match silences.first() {
        Some(first) if first.start <= LEADING_EDGE => first.end.min(total),
        _ => 0.0,
    };
    let trailing = match silences.last() {
        Some(last) if last.end >= total - TRAILING_EDGE => (total - last.start).max(0.0),
        _ => 0.0,
    };
    (leading, trailing)
}

/// Classify a measured file. Never fails; out-of-range values become
/// issues or warnings.
pub fn classify(
    total: f64,
    silences: &[SilenceInterval],
    text: &str,
    expected: Option<f64>,
) -> ValidationResult {
    let (leading, trailing) = edge_silence(total, silences);
    let speaking = total - leading - trailing;
    let words = count_words(text);

    let mut result = ValidationResult {
        actual_duration: Some(total),
        words_per_second: None,
        leading_silence: Some(leading),
        trailing_silence: Some(trailing),
        issues: Vec::new(),
        warnings: Vec::new(),
    };

    if let Some(expected) = expected.filter(|e| *e > 0.0) {
        let deviation = (total - expected).abs() / expected;
        if deviation > DURATION_TOLERANCE {
            result.issues.push(Issue::DurationMismatch {
                expected,
                actual: total,
                deviation,
            });
        }
    }

    if leading > MAX_LEADING_SILENCE {
        result.warnings.push(Warning::LeadingSilence { seconds: leading });
    }
    if trailing > MAX_TRAILING_SILENCE {
        result.warnings.push(Warning::TrailingSilence { seconds: trailing });
    }

    if speaking > 0.0 {
        let rate = words as f64 / speaking;
        result.words_per_second = Some(rate);
        if !(MIN_WORDS_PER_SECOND..=MAX_WORDS_PER_SECOND).contains(&rate) {
            result.warnings.push(Warning::SpeakingRate { rate });
        }
    } else {
        result.warnings.push(Warning::NoSpeech);
    }

    result
}

/// Measure `path` and classify it against `text` and `expected` seconds.
pub fn validate(
    probe: &dyn AudioProbe,
    path: &Path,
    text: &str,
    expected: Option<f64>,
) -> ValidationResult {
    let total = match probe.duration(path) {
        Ok(total) if total.is_finite() && total > 0.0 => total,
        Ok(total) => return unmeasurable(format!("probe reported {}s", total)),
        Err(e) => return unmeasurable(e.to_string()),
    };

    let silences = match probe.silences(path, SILENCE_THRESHOLD_DB, MIN_SILENCE) {
        Ok(silences) => silences,
        Err(e) => {
            warn!(
                "Silence detection failed for {}: {}; assuming none",
                path.display(),
                e
            );
            Vec::new()
        }
    };

    classify(total, &silences, text, expected)
}

fn unmeasurable(reason: String) -> ValidationResult {
    ValidationResult {
        issues: vec![Issue::DurationUnknown { reason }],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::WavProbe;
    use crate::audio::tests::write_wav;
    use crate::error::{PipelineError, Result};

    fn interval(start: f64, end: f64) -> SilenceInterval {
        SilenceInterval { start, end }
    }

    #[test]
    fn test_short_audio_against_expected_is_one_issue() {
        let silences = [interval(0.0, 0.1), interval(2.7, 3.0)];
        let text = "one two three four five six seven";
        let result = classify(3.0, &silences, text, Some(4.5));

        assert_eq!(result.issues.len(), 1);
        assert!(matches!(
            result.issues[0],
            Issue::DurationMismatch { expected, actual, .. } if expected == 4.5 && actual == 3.0
        ));
        let leading = result.leading_silence.unwrap();
        let trailing = result.trailing_silence.unwrap();
        assert_eq!(result.words_per_second, Some(7.0 / (3.0 - leading - trailing)));
        assert_eq!(result.verdict(), Verdict::Fail);
    }

    #[test]
    fn test_within_tolerance_passes() {
        let text = "one two three four five six seven eight nine";
        let result = classify(3.2, &[], text, Some(3.0));
        assert!(result.issues.is_empty());
        assert!(result.warnings.is_empty());
        assert_eq!(result.verdict(), Verdict::Pass);
    }

    #[test]
    fn test_edge_silence_rules() {
        // first interval starts too late to count as leading silence
        assert_eq!(edge_silence(3.0, &[interval(0.06, 0.4)]).0, 0.0);
        assert_eq!(edge_silence(3.0, &[interval(0.05, 0.4)]).0, 0.4);
        // last interval must reach within 0.1s of the end
        assert_eq!(edge_silence(3.0, &[interval(2.0, 2.85)]).1, 0.0);
        assert!((edge_silence(3.0, &[interval(2.0, 2.95)]).1 - 1.0).abs() < 1e-9);
        assert!((edge_silence(3.0, &[interval(2.5, 3.2)]).1 - 0.5).abs() < 1e-9);
        assert_eq!(edge_silence(3.0, &[]), (0.0, 0.0));
    }

    #[test]
    fn test_silence_and_rate_warnings() {
        let silences = [interval(0.0, 0.35), interval(2.2, 3.0)];
        let result = classify(3.0, &silences, "just two", None);
        assert!(result.issues.is_empty());
        assert!(result.warnings.contains(&Warning::LeadingSilence { seconds: 0.35 }));
        assert!(result
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::TrailingSilence { .. })));
        assert!(result
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::SpeakingRate { rate } if *rate < 2.0)));
        assert_eq!(result.verdict(), Verdict::Warn);
    }

    #[test]
    fn test_all_silence_is_no_speech() {
        let result = classify(1.0, &[interval(0.0, 1.0)], "hello", None);
        assert_eq!(result.words_per_second, None);
        assert!(result.warnings.contains(&Warning::NoSpeech));
    }

    struct BrokenProbe;

    impl AudioProbe for BrokenProbe {
        fn duration(&self, path: &Path) -> Result<f64> {
            Err(PipelineError::DurationUnmeasurable {
                path: path.to_path_buf(),
                reason: "corrupt".to_string(),
            })
        }

        fn silences(&self, _: &Path, _: f64, _: f64) -> Result<Vec<SilenceInterval>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_unmeasurable_duration_is_single_issue() {
        let result = validate(&BrokenProbe, Path::new("x.mp3"), "hello", Some(2.0));
        assert_eq!(result.issues.len(), 1);
        assert!(matches!(result.issues[0], Issue::DurationUnknown { .. }));
        assert!(result.warnings.is_empty());
        assert_eq!(result.actual_duration, None);
        assert_eq!(result.words_per_second, None);
        assert_eq!(result.leading_silence, None);
        assert_eq!(result.trailing_silence, None);
    }

    #[test]
    fn test_validate_real_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.wav");
        write_wav(&path, 0.15, 2.0, 0.3);
        let text = "this sentence has exactly seven short words";
        let result = validate(&WavProbe, &path, text, Some(2.3));

        assert!(result.issues.is_empty(), "{:?}", result.issues);
        assert!((result.actual_duration.unwrap() - 2.45).abs() < 1e-3);
        assert!((result.leading_silence.unwrap() - 0.15).abs() < 1e-3);
        assert!((result.trailing_silence.unwrap() - 0.3).abs() < 1e-3);
        let rate = result.words_per_second.unwrap();
        assert!((rate - 3.5).abs() < 0.01);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_issue_serializes_with_kind_tag() {
        let json = serde_json::to_value(Issue::DurationMismatch {
            expected: 4.5,
            actual: 3.0,
            deviation: 1.0 / 3.0,
        })
        .unwrap();
        assert_eq!(json["kind"], "durationMismatch");
        assert_eq!(json["expected"], 4.5);
    }
}
