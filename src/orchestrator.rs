use crate::audio::{AudioProbe, concat_files};
use crate::error::{PipelineError, Result};
use crate::metadata::{MetadataStore, ProjectMetadata, SceneResult};
use crate::project::{Project, Scene};
use crate::pronunciation::{Pronunciation, PronunciationResolver};
use crate::settings::{self, CharacterCascade, ResolvedSettings, SpeechModel};
use crate::stitching::{StitchingWindow, WindowSource};
use crate::tts::{SpeechBackend, SynthesisRequest};
use crate::utils::{combined_file_name, metadata_file_name, preview, sanitize_name, scene_file_name};
use crate::validator::{self, Verdict};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Pause between synthesis calls, for backend rate limits.
pub const INTER_SCENE_DELAY: Duration = Duration::from_millis(150);

const AUDIO_EXTENSION: &str = "mp3";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub voice_id: String,
    pub model: SpeechModel,
    pub cli_character: Option<String>,
    pub project_character: Option<String>,
    pub output_dir: PathBuf,
    pub skip_validation: bool,
    pub combine: bool,
    pub scene_delay: Duration,
}

#[derive(Debug)]
pub struct RunReport {
    pub scenes: Vec<SceneResult>,
    pub combined: Option<PathBuf>,
    pub metadata: PathBuf,
}

pub struct SceneOrchestrator<'a> {
    backend: &'a dyn SpeechBackend,
    pronunciation: &'a PronunciationResolver<'a>,
    probe: &'a dyn AudioProbe,
    options: RunOptions,
}

impl<'a> SceneOrchestrator<'a> {
    pub fn new(
        backend: &'a dyn SpeechBackend,
        pronunciation: &'a PronunciationResolver<'a>,
        probe: &'a dyn AudioProbe,
        options: RunOptions,
    ) -> Self {
        Self {
            backend,
            pronunciation,
            probe,
            options,
        }
    }

    pub fn project_dir(&self, project: &Project) -> PathBuf {
        self.options.output_dir.join(sanitize_name(&project.name))
    }

    pub fn metadata_store(&self, project: &Project) -> MetadataStore {
        MetadataStore::new(self.project_dir(project).join(metadata_file_name(&project.name)))
    }

    fn resolve_settings(&self, project: &Project, scene: &Scene) -> Result<ResolvedSettings> {
        let cascade = CharacterCascade {
            scene: scene.character.as_deref(),
            cli: self.options.cli_character.as_deref(),
            batch: project.character.as_deref(),
            project: self.options.project_character.as_deref(),
        };
        settings::resolve(&scene.overrides(), &cascade, &self.options.model)
    }

    /// Character recorded as the project-wide one in metadata.
    fn global_character(&self, project: &Project) -> Option<String> {
        self.options
            .cli_character
            .clone()
            .or_else(|| project.character.clone())
            .or_else(|| self.options.project_character.clone())
    }

    /// Generate every scene in order, recording each in the metadata as it
    /// lands, then combine. The first failing scene aborts the run; files
    /// and records already written stay.
    pub async fn generate(&self, project: &Project) -> Result<RunReport> {
        let resolved: Vec<ResolvedSettings> = project
            .scenes
            .iter()
            .map(|scene| self.resolve_settings(project, scene))
            .collect::<Result<_>>()?;

        let pronunciation = self
            .pronunciation
            .resolve(project.dictionary.as_deref())
            .await?;
        if let Some(p) = &pronunciation {
            let mode = if p.remote_reference().is_some() { "remote" } else { "local" };
            info!("Dictionary '{}' applied in {} mode", p.name(), mode);
        }

        let project_dir = self.project_dir(project);
        fs::create_dir_all(&project_dir)
            .map_err(|e| PipelineError::artifact_write(&project_dir, e))?;

        info!(
            "Generating {} scenes for project '{}' (voice {}, model {})",
            project.scenes.len(),
            project.name,
            self.options.voice_id,
            self.options.model
        );

        let total = project.scenes.len();
        let store = self.metadata_store(project);
        let mut metadata = ProjectMetadata {
            project: project.name.clone(),
            voice: self.options.voice_id.clone(),
            model: self.options.model.id().to_string(),
            character: self.global_character(project),
            dictionary: project.dictionary.clone(),
            scene_count: 0,
            total_characters: 0,
            generated_at: Utc::now(),
            updated_at: None,
            scenes: Vec::with_capacity(total),
        };
        let mut history: Vec<String> = Vec::new();
        for (i, (scene, settings)) in project.scenes.iter().zip(&resolved).enumerate() {
            info!("Generating scene {}/{}: {}", i + 1, total, scene.id);
            let window = WindowSource::Run(&history).window_for(i);
            let result = match self
                .produce_scene(project, scene, &scene.text, settings, window, pronunciation.as_ref())
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    error!(
                        "Scene {} failed; skipping the remaining {} scenes: {}",
                        scene.id,
                        total - i - 1,
                        e
                    );
                    return Err(e);
                }
            };
            if let Some(id) = &result.request_id {
                history.push(id.clone());
            }
            // Recorded per scene so a failed batch can be resumed with regenerate.
            metadata.push_scene(result);
            store.write_full(&metadata)?;

            if i + 1 < total && !self.options.scene_delay.is_zero() {
                sleep(self.options.scene_delay).await;
            }
        }

        let combined = if self.options.combine {
            let parts: Vec<PathBuf> = metadata
                .scenes
                .iter()
                .map(|r| project_dir.join(&r.file))
                .collect();
            let out = project_dir.join(combined_file_name(&project.name, AUDIO_EXTENSION));
            let bytes = concat_files(&parts, &out)?;
            info!("Combined audio written to {} ({} bytes)", out.display(), bytes);
            Some(out)
        } else {
            None
        };

        store.write_full(&metadata)?;
        info!("Metadata written to {}", store.path().display());

        log_summary(&metadata.scenes);

        Ok(RunReport {
            scenes: metadata.scenes,
            combined,
            metadata: store.path().to_path_buf(),
        })
    }

    /// Regenerate a single scene, stitching against the request ids a
    /// previous run stored, and merge the new result into the metadata.
    pub async fn regenerate(
        &self,
        project: &Project,
        scene_id: &str,
        text: Option<&str>,
    ) -> Result<SceneResult> {
        let index = project.scene_index(scene_id)?;
        let scene = &project.scenes[index];
        let settings = self.resolve_settings(project, scene)?;

        let store = self.metadata_store(project);
        let metadata = store.load()?;

        let pronunciation = self
            .pronunciation
            .resolve(project.dictionary.as_deref())
            .await?;

        let window = WindowSource::Persisted {
            scenes: &project.scenes,
            metadata: &metadata,
        }
        .window_for(index);
        info!(
            "Regenerating scene {} ({}/{}) with {} prior request ids",
            scene.id,
            index + 1,
            project.scenes.len(),
            window.len()
        );

        let text = text.unwrap_or(&scene.text);
        let result = self
            .produce_scene(project, scene, text, &settings, window, pronunciation.as_ref())
            .await?;

        store.merge_one(&scene.id, result.to_fields()?)?;
        info!("Metadata updated at {}", store.path().display());
        if self.options.combine {
            info!("Combined audio was not rebuilt; run a full generation to refresh it");
        }
        log_summary(std::slice::from_ref(&result));
        Ok(result)
    }

    async fn produce_scene(
        &self,
        project: &Project,
        scene: &Scene,
        text: &str,
        settings: &ResolvedSettings,
        window: StitchingWindow,
        pronunciation: Option<&Pronunciation>,
    ) -> Result<SceneResult> {
        let prepared = match pronunciation {
            Some(p) => p.prepare_text(text),
            None => text.to_string(),
        };
        if prepared != text {
            debug!("Text after substitution: {}", preview(&prepared, 120));
        }

        let window = if self.options.model.supports_stitching() {
            window
        } else {
            if !window.is_empty() {
                debug!(
                    "Model {} does not support stitching; dropping {} prior ids",
                    self.options.model,
                    window.len()
                );
            }
            StitchingWindow::default()
        };

        debug!(
            "Scene {}: character {}, stability {:.2}, similarity {:.2}, style {:.2}",
            scene.id,
            settings.character,
            settings.settings.stability,
            settings.settings.similarity,
            settings.settings.style
        );
        let request = SynthesisRequest {
            text: &prepared,
            voice_id: &self.options.voice_id,
            model: &self.options.model,
            settings: settings.settings,
            previous_request_ids: window.as_slice(),
            dictionary: pronunciation.and_then(Pronunciation::remote_reference),
        };
        let synthesis = self.backend.synthesize(&request).await?;

        let file = scene_file_name(&project.name, &scene.id, AUDIO_EXTENSION);
        let path = self.project_dir(project).join(&file);
        write_artifact(&path, &synthesis.audio)?;
        info!(
            "Scene {} written to {} ({} bytes)",
            scene.id,
            path.display(),
            synthesis.audio.len()
        );

        let validation = if self.options.skip_validation {
            None
        } else {
            let result = validator::validate(self.probe, &path, text, scene.expected_duration);
            result.log(&scene.id);
            Some(result)
        };
        let validation = validation.unwrap_or_default();

        Ok(SceneResult {
            id: scene.id.clone(),
            file,
            text: text.to_string(),
            size: synthesis.audio.len() as u64,
            expected_duration: scene.expected_duration,
            actual_duration: validation.actual_duration,
            words_per_second: validation.words_per_second,
            leading_silence: validation.leading_silence,
            trailing_silence: validation.trailing_silence,
            request_id: synthesis.request_id,
            character: settings.character.to_string(),
            delay: scene.delay,
            issues: validation.issues,
            warnings: validation.warnings,
            generated_at: Utc::now(),
        })
    }
}

fn write_artifact(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::artifact_write(parent, e))?;
    }
    fs::write(path, data).map_err(|e| PipelineError::artifact_write(path, e))
}

fn log_summary(results: &[SceneResult]) {
    let mut failed = 0;
    let mut warned = 0;
    for r in results {
        let verdict = if !r.issues.is_empty() {
            failed += 1;
            Verdict::Fail
        } else if !r.warnings.is_empty() {
            warned += 1;
            Verdict::Warn
        } else {
            Verdict::Pass
        };
        let fmt_secs = |v: Option<f64>| v.map_or("-".to_string(), |s| format!("{:.2}s", s));
        info!(
            "[{}] {}: duration {} (expected {}), {} words/s, {} issues, {} warnings",
            verdict,
            r.id,
            fmt_secs(r.actual_duration),
            fmt_secs(r.expected_duration),
            r.words_per_second
                .map_or("-".to_string(), |w| format!("{:.2}", w)),
            r.issues.len(),
            r.warnings.len()
        );
    }
    if failed > 0 {
        warn!(
            "{} of {} scenes failed timing checks ({} with warnings only)",
            failed,
            results.len(),
            warned
        );
    } else {
        info!(
            "{} scenes generated, {} with warnings",
            results.len(),
            warned
        );
    }
}
