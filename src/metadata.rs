use crate::error::{PipelineError, Result};
use crate::validator::{Issue, Warning};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneResult {
    pub id: String,
    pub file: String,
    pub text: String,
    pub size: u64,
    #[serde(default)]
    pub expected_duration: Option<f64>,
    #[serde(default)]
    pub actual_duration: Option<f64>,
    #[serde(default)]
    pub words_per_second: Option<f64>,
    #[serde(default)]
    pub leading_silence: Option<f64>,
    #[serde(default)]
    pub trailing_silence: Option<f64>,
    #[serde(default)]
    pub request_id: Option<String>,
    pub character: String,
    #[serde(default)]
    pub delay: Option<f64>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    pub generated_at: DateTime<Utc>,
}

impl SceneResult {
    /// All fields as a JSON object, ready for a shallow merge.
    pub fn to_fields(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(PipelineError::Json(serde::ser::Error::custom(format!(
                "scene result serialized to {} instead of an object",
                other
            )))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    pub project: String,
    pub voice: String,
    pub model: String,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub dictionary: Option<String>,
    pub scene_count: usize,
    pub total_characters: usize,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub scenes: Vec<SceneResult>,
}

impl ProjectMetadata {
    pub fn scene(&self, id: &str) -> Option<&SceneResult> {
        self.scenes.iter().find(|s| s.id == id)
    }

    /// Append a finished scene and refresh the totals.
    pub fn push_scene(&mut self, scene: SceneResult) {
        self.total_characters += scene.text.chars().count();
        self.scenes.push(scene);
        self.scene_count = self.scenes.len();
    }
}

/// One metadata file per project.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ProjectMetadata> {
        Ok(serde_json::from_value(self.load_value()?)?)
    }

    fn load_value(&self) -> Result<Value> {
        if !self.path.exists() {
            return Err(PipelineError::MetadataMissing(self.path.clone()));
        }
        let data = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn write_value(&self, value: &Value) -> Result<()> {
        let data = serde_json::to_string_pretty(value)?;
        fs::write(&self.path, data).map_err(|e| PipelineError::artifact_write(&self.path, e))
    }

    /// Replace the whole record.
    pub fn write_full(&self, metadata: &ProjectMetadata) -> Result<()> {
        let value = serde_json::to_value(metadata)?;
        self.write_value(&value)?;
        debug!(
            "Wrote metadata for {} scenes to {}",
            metadata.scenes.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Shallow-merge `fields` into the scene entry with id `scene_id` and
    /// write the record back. Every other entry is carried over as parsed,
    /// so its serialized form does not change.
    ///
    /// Requires a record written earlier by [`MetadataStore::write_full`].
    pub fn merge_one(&self, scene_id: &str, fields: Map<String, Value>) -> Result<()> {
        let mut root = self.load_value()?;
        let record = root.as_object_mut().ok_or_else(|| {
            PipelineError::Config(format!("{} is not a JSON object", self.path.display()))
        })?;

        let scenes = record
            .entry("scenes")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "{}: 'scenes' is not an array",
                    self.path.display()
                ))
            })?;

        match scenes
            .iter()
            .position(|entry| entry.get("id").and_then(Value::as_str) == Some(scene_id))
        {
            Some(index) => {
                let entry = scenes[index].as_object_mut().ok_or_else(|| {
                    PipelineError::Config(format!("scene '{}' is not a JSON object", scene_id))
                })?;
                for (key, value) in fields {
                    entry.insert(key, value);
                }
            }
            None => {
                info!(
                    "Scene '{}' not present in {}; appending it",
                    scene_id,
                    self.path.display()
                );
                let mut entry = fields;
                entry.insert("id".to_string(), Value::String(scene_id.to_string()));
                scenes.push(Value::Object(entry));
            }
        }

        let scene_count = scenes.len();
        let total_characters: usize = scenes
            .iter()
            .filter_map(|s| s.get("text").and_then(Value::as_str))
            .map(|t| t.chars().count())
            .sum();
        record.insert("sceneCount".to_string(), Value::from(scene_count));
        record.insert("totalCharacters".to_string(), Value::from(total_characters));
        record.insert(
            "updatedAt".to_string(),
            serde_json::to_value(Utc::now())?,
        );

        self.write_value(&root)?;
        debug!("Merged scene '{}' into {}", scene_id, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(id: &str, request_id: Option<&str>, duration: f64) -> SceneResult {
        SceneResult {
            id: id.to_string(),
            file: format!("demo_{}.mp3", id),
            text: format!("Text of {}.", id),
            size: 1024,
            expected_duration: Some(3.0),
            actual_duration: Some(duration),
            words_per_second: Some(2.87),
            leading_silence: Some(0.04),
            trailing_silence: Some(0.31),
            request_id: request_id.map(str::to_string),
            character: "narrator".to_string(),
            delay: None,
            issues: Vec::new(),
            warnings: vec![Warning::TrailingSilence { seconds: 0.61 }],
            generated_at: Utc::now(),
        }
    }

    fn metadata() -> ProjectMetadata {
        ProjectMetadata {
            project: "demo".to_string(),
            voice: "voice-1".to_string(),
            model: "eleven_multilingual_v2".to_string(),
            character: Some("narrator".to_string()),
            dictionary: None,
            scene_count: 3,
            total_characters: 45,
            generated_at: Utc::now(),
            updated_at: None,
            scenes: vec![
                scene("scene1", Some("req-1"), 3.1234567),
                scene("scene2", Some("req-2"), 2.5),
                scene("scene3", None, 4.0000001),
            ],
        }
    }

    #[test]
    fn test_write_full_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("demo_metadata.json"));
        let meta = metadata();
        store.write_full(&meta).unwrap();
        assert_eq!(store.load().unwrap(), meta);
    }

    #[test]
    fn test_merge_one_leaves_other_scenes_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("demo_metadata.json"));
        store.write_full(&metadata()).unwrap();
        let before: Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();

        let mut fields = Map::new();
        fields.insert("text".to_string(), Value::from("Brand new words."));
        store.merge_one("scene2", fields).unwrap();

        let raw_after = fs::read_to_string(store.path()).unwrap();
        let after: Value = serde_json::from_str(&raw_after).unwrap();

        for index in [0, 2] {
            assert_eq!(
                serde_json::to_string(&before["scenes"][index]).unwrap(),
                serde_json::to_string(&after["scenes"][index]).unwrap()
            );
        }
        assert!(raw_after.contains(r#""actualDuration": 3.1234567"#));
        assert!(raw_after.contains(r#""actualDuration": 4.0000001"#));

        let changed = &after["scenes"][1];
        assert_eq!(changed["text"], "Brand new words.");
        assert_eq!(changed["requestId"], before["scenes"][1]["requestId"]);
        assert_eq!(changed["actualDuration"], before["scenes"][1]["actualDuration"]);
        assert!(after["updatedAt"].is_string());
        assert_eq!(after["generatedAt"], before["generatedAt"]);
    }

    #[test]
    fn test_merge_one_keeps_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("demo_metadata.json"));
        store.write_full(&metadata()).unwrap();

        let mut fields = Map::new();
        fields.insert("reviewed".to_string(), Value::Bool(true));
        store.merge_one("scene1", fields).unwrap();

        let updated = scene("scene1", Some("req-9"), 2.0).to_fields().unwrap();
        store.merge_one("scene1", updated).unwrap();

        let after: Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(after["scenes"][0]["reviewed"], true);
        assert_eq!(after["scenes"][0]["requestId"], "req-9");
        assert_eq!(store.load().unwrap().scenes[0].request_id.as_deref(), Some("req-9"));
    }

    #[test]
    fn test_merge_one_unknown_scene_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("demo_metadata.json"));
        store.write_full(&metadata()).unwrap();

        let fields = scene("scene4", Some("req-4"), 1.0).to_fields().unwrap();
        store.merge_one("scene4", fields).unwrap();

        let meta = store.load().unwrap();
        assert_eq!(meta.scene_count, 4);
        assert_eq!(meta.scenes[3].id, "scene4");
    }

    #[test]
    fn test_merge_without_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("missing.json"));
        let err = store.merge_one("scene1", Map::new()).unwrap_err();
        assert!(matches!(err, PipelineError::MetadataMissing(_)));
    }
}
