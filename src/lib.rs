use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};

pub mod artifact;
pub mod backends;
pub mod cluster;
pub mod engine;
pub mod geometry;
pub mod lang;
pub mod layout;
pub mod logging;
pub mod orchestrator;
pub mod pages;
pub mod pipeline;
pub mod queue;
pub mod recognizer;
pub mod settings;

pub use cluster::{ClusterConfig, LayoutMode, cluster as cluster_fragments};
pub use geometry::{Block, Fragment, PageBlocks, Rect};
pub use lang::{LanguagePair, ScriptLanguage};
pub use layout::{LayoutConfig, adjust};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use queue::{ChapterRef, Job, JobState, TranslationQueue};

use crate::artifact::FsArtifactStore;
use crate::backends::DefaultEngineFactory;
use crate::engine::EngineHandle;
use crate::pages::LibraryPageSource;
use crate::pipeline::WorkerContext;

/// CLI-facing configuration; everything optional falls back to settings.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub library: String,
    pub output: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub engine: Option<String>,
    pub model: Option<String>,
    pub key: Option<String>,
    pub max_sources: Option<usize>,
    pub settings_path: Option<String>,
}

/// Scan the library, queue every untranslated chapter, and run the
/// orchestrator to completion.
pub async fn run(config: Config) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;

    if let Some(from) = config.from.as_deref() {
        settings.from_lang = ScriptLanguage::from_name(from)?;
    }
    if let Some(to) = config.to.as_deref() {
        settings.to_lang = to.trim().to_lowercase();
    }
    if let Some(engine) = config.engine.as_deref() {
        settings.engine = backends::EngineKind::from_name(engine)?;
    }
    if let Some(model) = config.model.as_deref() {
        settings.model = Some(model.to_string());
    }
    if let Some(key) = config.key.as_deref() {
        settings.api_key = Some(key.to_string());
    }
    if let Some(max_sources) = config.max_sources {
        if max_sources == 0 {
            return Err(anyhow!("--max-sources must be at least 1"));
        }
        settings.queue.max_source_groups = max_sources;
    }

    let library = config.library.trim();
    if library.is_empty() {
        return Err(anyhow!("library path is empty"));
    }
    if !Path::new(library).is_dir() {
        return Err(anyhow!("library path is not a directory: {}", library));
    }
    let output = config.output.as_deref().unwrap_or(library);

    let languages = LanguagePair::new(settings.from_lang, &settings.to_lang)?;
    let factory = DefaultEngineFactory {
        kind: settings.engine,
        key: settings.api_key.clone(),
        model: settings.model.clone(),
        max_output_tokens: settings.max_output_tokens,
        temperature: settings.temperature,
    };
    let engines = EngineHandle::new(Box::new(factory), &languages).await?;

    let source = LibraryPageSource::new(library);
    let chapters = source.list_chapters()?;
    if chapters.is_empty() {
        return Ok("no chapters found".to_string());
    }

    let ctx = WorkerContext {
        queue: Arc::new(TranslationQueue::new()),
        engines: Arc::new(engines),
        pages: Arc::new(source),
        store: Arc::new(FsArtifactStore::new(output)),
        cluster: settings.cluster.clone(),
        layout: settings.layout.clone(),
    };
    let orchestrator = Orchestrator::new(ctx, settings.queue.clone());

    let mut queued = 0usize;
    for chapter in chapters {
        if orchestrator.enqueue(chapter, languages.clone()) {
            queued += 1;
        }
    }
    if queued == 0 {
        return Ok("nothing to translate (all chapters already have artifacts)".to_string());
    }

    orchestrator.start();
    orchestrator.join().await;

    let failed = orchestrator
        .queue()
        .snapshot()
        .iter()
        .filter(|job| job.state == JobState::Failed)
        .count();
    let translated = queued.saturating_sub(failed);
    Ok(format!(
        "translated {} chapter(s), {} failed",
        translated, failed
    ))
}
