use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named delivery presets. Unknown names are rejected when parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Character {
    Literal,
    Narrator,
    Salesperson,
    Expert,
    Conversational,
    Dramatic,
    Calm,
}

impl Character {
    pub const ALL: [Character; 7] = [
        Character::Literal,
        Character::Narrator,
        Character::Salesperson,
        Character::Expert,
        Character::Conversational,
        Character::Dramatic,
        Character::Calm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Character::Literal => "literal",
            Character::Narrator => "narrator",
            Character::Salesperson => "salesperson",
            Character::Expert => "expert",
            Character::Conversational => "conversational",
            Character::Dramatic => "dramatic",
            Character::Calm => "calm",
        }
    }

    pub fn settings(&self) -> VoiceSettings {
        let (stability, similarity, style) = match self {
            Character::Literal => (0.75, 0.75, 0.0),
            Character::Narrator => (0.6, 0.8, 0.2),
            Character::Salesperson => (0.35, 0.75, 0.6),
            Character::Expert => (0.7, 0.85, 0.15),
            Character::Conversational => (0.45, 0.75, 0.35),
            Character::Dramatic => (0.25, 0.7, 0.8),
            Character::Calm => (0.85, 0.8, 0.1),
        };
        VoiceSettings {
            stability,
            similarity,
            style,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Character::Literal => "steady, neutral reading of the text",
            Character::Narrator => "warm storytelling with light expression",
            Character::Salesperson => "energetic and persuasive",
            Character::Expert => "confident, measured explanation",
            Character::Conversational => "relaxed, casual delivery",
            Character::Dramatic => "wide dynamic range, strong emphasis",
            Character::Calm => "slow, soothing, very even",
        }
    }
}

impl fmt::Display for Character {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Character {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Character::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == name)
            .ok_or_else(|| PipelineError::InvalidCharacter(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f64,
    pub similarity: f64,
    pub style: f64,
}

/// Explicit numeric values set on a single scene. Each one wins over any
/// preset for its own field only.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SettingsOverrides {
    pub stability: Option<f64>,
    pub similarity: Option<f64>,
    pub style: Option<f64>,
}

/// Character names from every level of the cascade, highest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharacterCascade<'a> {
    pub scene: Option<&'a str>,
    pub cli: Option<&'a str>,
    pub batch: Option<&'a str>,
    pub project: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedSettings {
    pub settings: VoiceSettings,
    pub character: Character,
}

/// Resolve the final voice settings for one scene.
///
/// Every name in the cascade is parsed, even the ones that lose, so a typo
/// anywhere in a project fails the run before any audio is requested.
pub fn resolve(
    overrides: &SettingsOverrides,
    cascade: &CharacterCascade<'_>,
    model: &SpeechModel,
) -> Result<ResolvedSettings> {
    let levels = [cascade.scene, cascade.cli, cascade.batch, cascade.project];
    let mut chosen = None;
    for name in levels.into_iter().flatten() {
        let character: Character = name.parse()?;
        chosen.get_or_insert(character);
    }
    let character = chosen.unwrap_or(Character::Literal);

    let preset = character.settings();
    let mut settings = VoiceSettings {
        stability: overrides.stability.unwrap_or(preset.stability),
        similarity: overrides.similarity.unwrap_or(preset.similarity),
        style: overrides.style.unwrap_or(preset.style),
    };

    if model.discrete_stability() {
        settings.stability = snap_stability(settings.stability);
    }

    Ok(ResolvedSettings {
        settings,
        character,
    })
}

pub fn snap_stability(value: f64) -> f64 {
    if value <= 0.25 {
        0.0
    } else if value <= 0.75 {
        0.5
    } else {
        1.0
    }
}

/// Synthesis model ids understood by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SpeechModel {
    #[default]
    MultilingualV2,
    TurboV2_5,
    FlashV2_5,
    V3,
    Other(String),
}

impl SpeechModel {
    pub fn id(&self) -> &str {
        match self {
            SpeechModel::MultilingualV2 => "eleven_multilingual_v2",
            SpeechModel::TurboV2_5 => "eleven_turbo_v2_5",
            SpeechModel::FlashV2_5 => "eleven_flash_v2_5",
            SpeechModel::V3 => "eleven_v3",
            SpeechModel::Other(id) => id,
        }
    }

    /// v3 only accepts stability 0.0, 0.5 or 1.0.
    pub fn discrete_stability(&self) -> bool {
        matches!(self, SpeechModel::V3)
    }

    pub fn supports_stitching(&self) -> bool {
        !matches!(self, SpeechModel::V3)
    }
}

impl From<&str> for SpeechModel {
    fn from(id: &str) -> Self {
        match id.trim() {
            "eleven_multilingual_v2" => SpeechModel::MultilingualV2,
            "eleven_turbo_v2_5" => SpeechModel::TurboV2_5,
            "eleven_flash_v2_5" => SpeechModel::FlashV2_5,
            "eleven_v3" => SpeechModel::V3,
            other => SpeechModel::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SpeechModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_stability_thresholds() {
        assert_eq!(snap_stability(0.1), 0.0);
        assert_eq!(snap_stability(0.25), 0.0);
        assert_eq!(snap_stability(0.5), 0.5);
        assert_eq!(snap_stability(0.26), 0.5);
        assert_eq!(snap_stability(0.75), 0.5);
        assert_eq!(snap_stability(0.76), 1.0);
        assert_eq!(snap_stability(0.9), 1.0);
    }

    #[test]
    fn test_scene_character_beats_batch_and_cli() {
        let cascade = CharacterCascade {
            scene: Some("calm"),
            cli: Some("dramatic"),
            batch: Some("narrator"),
            project: None,
        };
        let resolved = resolve(
            &SettingsOverrides::default(),
            &cascade,
            &SpeechModel::MultilingualV2,
        )
        .unwrap();
        assert_eq!(resolved.character, Character::Calm);
        assert_eq!(resolved.settings, Character::Calm.settings());
    }

    #[test]
    fn test_cascade_falls_through_levels() {
        let model = SpeechModel::MultilingualV2;
        let none = SettingsOverrides::default();

        let cli = CharacterCascade {
            cli: Some("dramatic"),
            batch: Some("narrator"),
            project: Some("expert"),
            ..Default::default()
        };
        assert_eq!(resolve(&none, &cli, &model).unwrap().character, Character::Dramatic);

        let batch = CharacterCascade {
            batch: Some("narrator"),
            project: Some("expert"),
            ..Default::default()
        };
        assert_eq!(resolve(&none, &batch, &model).unwrap().character, Character::Narrator);

        let project = CharacterCascade {
            project: Some("Expert"),
            ..Default::default()
        };
        assert_eq!(resolve(&none, &project, &model).unwrap().character, Character::Expert);

        let empty = CharacterCascade::default();
        assert_eq!(resolve(&none, &empty, &model).unwrap().character, Character::Literal);
    }

    #[test]
    fn test_numeric_override_wins_per_field() {
        let overrides = SettingsOverrides {
            stability: Some(0.1),
            similarity: None,
            style: Some(0.9),
        };
        let cascade = CharacterCascade {
            scene: Some("narrator"),
            ..Default::default()
        };
        let resolved = resolve(&overrides, &cascade, &SpeechModel::MultilingualV2).unwrap();
        assert_eq!(resolved.settings.stability, 0.1);
        assert_eq!(resolved.settings.similarity, Character::Narrator.settings().similarity);
        assert_eq!(resolved.settings.style, 0.9);
    }

    #[test]
    fn test_snap_happens_after_override() {
        let overrides = SettingsOverrides {
            stability: Some(0.76),
            ..Default::default()
        };
        let resolved =
            resolve(&overrides, &CharacterCascade::default(), &SpeechModel::V3).unwrap();
        assert_eq!(resolved.settings.stability, 1.0);

        let untouched = resolve(
            &overrides,
            &CharacterCascade::default(),
            &SpeechModel::MultilingualV2,
        )
        .unwrap();
        assert_eq!(untouched.settings.stability, 0.76);
    }

    #[test]
    fn test_unknown_character_is_rejected_at_any_level() {
        let cascade = CharacterCascade {
            scene: Some("calm"),
            project: Some("pirate"),
            ..Default::default()
        };
        let err = resolve(
            &SettingsOverrides::default(),
            &cascade,
            &SpeechModel::MultilingualV2,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidCharacter(name) if name == "pirate"));
    }

    #[test]
    fn test_model_capabilities() {
        assert!(SpeechModel::from("eleven_v3").discrete_stability());
        assert!(!SpeechModel::from("eleven_v3").supports_stitching());
        let other = SpeechModel::from("eleven_custom");
        assert_eq!(other.id(), "eleven_custom");
        assert!(other.supports_stitching());
        assert_eq!(SpeechModel::default(), SpeechModel::MultilingualV2);
    }
}
