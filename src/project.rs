use crate::error::{PipelineError, Result};
use crate::settings::SettingsOverrides;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,
}

impl Scene {
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            stability: self.stability,
            similarity: self.similarity,
            style: self.style,
        }
    }
}

/// A project definition file: shared voice/model defaults plus the ordered
/// scene list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Batch-level character, applied to every scene without its own.
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub dictionary: Option<String>,
    pub scenes: Vec<Scene>,
}

impl Project {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            PipelineError::ProjectDefinition(format!("cannot read {}: {}", path.display(), e))
        })?;
        let project = Self::parse(&data)?;
        debug!(
            "Loaded project '{}' with {} scenes from {}",
            project.name,
            project.scenes.len(),
            path.display()
        );
        Ok(project)
    }

    pub fn parse(data: &str) -> Result<Self> {
        let project: Project = serde_json::from_str(data)
            .map_err(|e| PipelineError::ProjectDefinition(e.to_string()))?;
        project.check()?;
        Ok(project)
    }

    fn check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::ProjectDefinition(
                "project name is empty".to_string(),
            ));
        }
        if self.scenes.is_empty() {
            return Err(PipelineError::ProjectDefinition(format!(
                "project '{}' has no scenes",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for scene in &self.scenes {
            if !seen.insert(scene.id.as_str()) {
                return Err(PipelineError::ProjectDefinition(format!(
                    "duplicate scene id '{}'",
                    scene.id
                )));
            }
            if scene.text.trim().is_empty() {
                return Err(PipelineError::ProjectDefinition(format!(
                    "scene '{}' has empty text",
                    scene.id
                )));
            }
            for (field, value) in [
                ("stability", scene.stability),
                ("similarity", scene.similarity),
                ("style", scene.style),
            ] {
                if let Some(v) = value {
                    if !(0.0..=1.0).contains(&v) {
                        return Err(PipelineError::ProjectDefinition(format!(
                            "scene '{}': {} {} is outside [0, 1]",
                            scene.id, field, v
                        )));
                    }
                }
            }
            if let Some(expected) = scene.expected_duration {
                if expected <= 0.0 {
                    return Err(PipelineError::ProjectDefinition(format!(
                        "scene '{}': expectedDuration must be positive",
                        scene.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn scene_index(&self, scene_id: &str) -> Result<usize> {
        self.scenes
            .iter()
            .position(|s| s.id == scene_id)
            .ok_or_else(|| PipelineError::SceneNotFound(scene_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_project() {
        let project = Project::parse(
            r#"{
                "name": "intro",
                "voice": "voice-1",
                "character": "narrator",
                "scenes": [
                    {"id": "scene1", "text": "Hello there.", "expectedDuration": 1.5},
                    {"id": "scene2", "text": "Welcome back.", "character": "calm", "stability": 0.4, "delay": 0.5}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(project.scenes.len(), 2);
        assert_eq!(project.character.as_deref(), Some("narrator"));
        assert_eq!(project.scenes[0].expected_duration, Some(1.5));
        assert_eq!(project.scenes[1].overrides().stability, Some(0.4));
        assert_eq!(project.scenes[1].delay, Some(0.5));
        assert_eq!(project.scene_index("scene2").unwrap(), 1);
        assert!(matches!(
            project.scene_index("scene9"),
            Err(PipelineError::SceneNotFound(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = Project::parse(
            r#"{"name": "p", "scenes": [{"id": "a", "text": "x"}, {"id": "a", "text": "y"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate scene id"));
    }

    #[test]
    fn test_rejects_out_of_range_override() {
        let err = Project::parse(
            r#"{"name": "p", "scenes": [{"id": "a", "text": "x", "style": 1.5}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ProjectDefinition(_)));
    }

    #[test]
    fn test_rejects_empty_scene_list() {
        assert!(Project::parse(r#"{"name": "p", "scenes": []}"#).is_err());
    }
}
