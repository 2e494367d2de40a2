mod args;
mod audio;
mod config;
mod error;
mod metadata;
mod orchestrator;
mod project;
mod pronunciation;
mod settings;
mod stitching;
mod tts;
mod utils;
mod validator;

use crate::args::{Args, Command, RunFlags};
use crate::audio::MediaProbe;
use crate::config::Config;
use crate::error::PipelineError;
use crate::orchestrator::{INTER_SCENE_DELAY, RunOptions, SceneOrchestrator};
use crate::project::Project;
use crate::pronunciation::{DictionaryCache, PronunciationResolver};
use crate::settings::{Character, SpeechModel};
use crate::tts::ElevenLabsClient;
use clap::Parser;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = Config::from_env();

    match args.command {
        Command::Generate { project, run } => {
            let project = load_project(&project)?;
            let backend = ElevenLabsClient::new(&config.api_url, config.require_api_key()?);
            let cache = DictionaryCache::new(&config.dictionary_cache);
            let resolver = PronunciationResolver::new(&backend, &cache, &config.dictionary_dir);
            let probe = MediaProbe::default();
            let options = run_options(&config, &project, &run)?;
            let orchestrator = SceneOrchestrator::new(&backend, &resolver, &probe, options);

            let report = orchestrator.generate(&project).await?;
            info!("{} scene files written", report.scenes.len());
            if let Some(combined) = &report.combined {
                info!("Combined: {}", combined.display());
            }
            info!("Metadata: {}", report.metadata.display());
        }
        Command::Regenerate {
            project,
            scene_id,
            text,
            run,
        } => {
            let project = load_project(&project)?;
            let backend = ElevenLabsClient::new(&config.api_url, config.require_api_key()?);
            let cache = DictionaryCache::new(&config.dictionary_cache);
            let resolver = PronunciationResolver::new(&backend, &cache, &config.dictionary_dir);
            let probe = MediaProbe::default();
            let options = run_options(&config, &project, &run)?;
            let orchestrator = SceneOrchestrator::new(&backend, &resolver, &probe, options);

            let result = orchestrator
                .regenerate(&project, &scene_id, text.as_deref())
                .await?;
            info!("Scene {} regenerated: {}", result.id, result.file);
        }
        Command::Validate {
            audio,
            text,
            expected,
        } => {
            if !audio.exists() {
                error!("Audio file not found: {}", audio.display());
                anyhow::bail!("audio file not found: {}", audio.display());
            }
            let result = validator::validate(&MediaProbe::default(), &audio, &text, expected);
            result.log(&audio.display().to_string());
            info!("Verdict: {}", result.verdict());
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Characters => {
            for character in Character::ALL {
                let s = character.settings();
                println!(
                    "{:<15} stability {:.2}  similarity {:.2}  style {:.2}  {}",
                    character.as_str(),
                    s.stability,
                    s.similarity,
                    s.style,
                    character.description()
                );
            }
        }
        Command::ForgetDictionary { name } => {
            let cache = DictionaryCache::new(&config.dictionary_cache);
            if cache.remove(&name)? {
                info!("Removed '{}' from {}", name, cache.path().display());
            } else {
                warn!("'{}' was not cached in {}", name, cache.path().display());
            }
        }
    }

    Ok(())
}

fn load_project(path: &Path) -> anyhow::Result<Project> {
    if !path.exists() {
        error!("Project file not found: {}", path.display());
        anyhow::bail!("project file not found: {}", path.display());
    }
    let project = Project::load(path)?;
    info!(
        "Loaded project '{}' with {} scenes from {}",
        project.name,
        project.scenes.len(),
        path.display()
    );
    Ok(project)
}

/// Flags win over the project file, which wins over the environment.
fn run_options(
    config: &Config,
    project: &Project,
    run: &RunFlags,
) -> crate::error::Result<RunOptions> {
    let voice_id = run
        .voice
        .clone()
        .or_else(|| project.voice.clone())
        .or_else(|| config.voice_id.clone())
        .ok_or_else(|| {
            PipelineError::Config(
                "no voice: pass --voice, set it in the project or SCENEVOICE_VOICE_ID".to_string(),
            )
        })?;
    let model = run
        .model
        .as_deref()
        .or(project.model.as_deref())
        .map(SpeechModel::from)
        .unwrap_or_else(|| SpeechModel::from(config.model.as_str()));
    if let SpeechModel::Other(id) = &model {
        warn!("Unknown model '{}'; assuming it supports stitching", id);
    }

    Ok(RunOptions {
        voice_id,
        model,
        cli_character: run.character.clone(),
        project_character: config.character.clone(),
        output_dir: run
            .output_dir
            .clone()
            .unwrap_or_else(|| config.output_dir.clone()),
        skip_validation: run.skip_validation,
        combine: !run.no_combine,
        scene_delay: INTER_SCENE_DELAY,
    })
}
