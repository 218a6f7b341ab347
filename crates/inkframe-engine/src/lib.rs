//! Panel generation and assembly for inkframe comics.
//!
//! A [`ComicPipeline`] validates a panel list, renders every panel concurrently into
//! a fresh working directory (falling back to placeholders panel by panel), bundles
//! the results into a PDF and a ZIP, and schedules the directory for deletion.

pub mod assemble;
pub mod canvas;
pub mod config;
pub mod lifecycle;
pub mod orchestrator;
pub mod providers;
pub mod render;
pub mod story;

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use chrono::Local;
use inkframe_contracts::{
    Bundle, BundleNames, ComicError, ComicEvent, EventWriter, PanelPrompt, PanelSet, RenderResult,
};
use tracing::{info, warn};

pub use assemble::assemble;
pub use config::{EngineKind, PipelineConfig};
pub use lifecycle::{schedule_cleanup, ArtifactStore};
pub use providers::{provider_for, ImageBytes, ImageProvider, ProviderSlot, StyleHints};
pub use render::PanelRenderer;
pub use story::{PromptGenerator, StoryBrief};

const DEFAULT_REQUEST_ID: &str = "inkframe";

/// Everything one successful `generate` call produced.
#[derive(Debug)]
pub struct ComicRun {
    pub request_id: String,
    pub working_dir: PathBuf,
    pub results: Vec<RenderResult>,
    pub bundle: Bundle,
    /// Detached deletion of `working_dir`; join it only to wait for the cleanup.
    pub cleanup: Option<JoinHandle<()>>,
}

impl ComicRun {
    pub fn fallback_count(&self) -> usize {
        self.results
            .iter()
            .filter(|result| result.used_fallback)
            .count()
    }
}

pub struct ComicPipeline {
    config: PipelineConfig,
    renderer: PanelRenderer,
    store: ArtifactStore,
    events: EventWriter,
}

impl ComicPipeline {
    /// Resolves the provider for `config.engine` once. Missing credentials leave the
    /// pipeline usable, with every panel rendered as a placeholder.
    pub fn new(config: PipelineConfig) -> Result<Self, ComicError> {
        let font = canvas::init_panel_font(config.font_path.as_deref());
        match font.source() {
            Some(path) => info!(font = %path.display(), "panel text uses TrueType font"),
            None => info!("panel text uses built-in bitmap font"),
        }
        let slot = provider_for(&config)?;
        if let ProviderSlot::Unavailable(reason) = &slot {
            warn!(
                engine = %config.engine,
                reason = %reason,
                "no image provider available; panels will be placeholders"
            );
        }
        Ok(Self::from_slot(config, slot))
    }

    /// Same pipeline around an already-built provider.
    pub fn with_provider(config: PipelineConfig, provider: Box<dyn ImageProvider>) -> Self {
        canvas::init_panel_font(config.font_path.as_deref());
        Self::from_slot(config, ProviderSlot::Ready(provider))
    }

    fn from_slot(config: PipelineConfig, slot: ProviderSlot) -> Self {
        let store = ArtifactStore::new(&config.storage_root);
        let events = EventWriter::new(config.events_path(), DEFAULT_REQUEST_ID);
        Self {
            config,
            renderer: PanelRenderer::new(slot),
            store,
            events,
        }
    }

    pub fn with_events_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.events = EventWriter::new(path, DEFAULT_REQUEST_ID);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn events_path(&self) -> &Path {
        self.events.path()
    }

    /// Renders an already validated panel set into `working_dir`, ordered by index.
    pub fn generate_all(&self, panels: &PanelSet, working_dir: &Path) -> Vec<RenderResult> {
        orchestrator::generate_all(&self.renderer, panels, working_dir, None)
    }

    /// Runs one full request.
    ///
    /// The panel count is checked before anything touches the filesystem. Once the
    /// working directory exists, only an assembly failure is returned as an error.
    pub fn generate(&self, prompts: Vec<PanelPrompt>) -> Result<ComicRun, ComicError> {
        let panels = PanelSet::from_prompts(prompts, self.config.mode)?;
        let working_dir = self.store.create_scope()?;
        let request_id = working_dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(DEFAULT_REQUEST_ID)
            .to_string();
        let events = self.events.for_request(&request_id);

        info!(
            request = %request_id,
            engine = %self.config.engine,
            panels = panels.len(),
            "comic generation started"
        );
        record(
            &events,
            ComicEvent::ComicStarted {
                working_dir: working_dir.display().to_string(),
                engine: self.config.engine.to_string(),
                panel_count: panels.len(),
            },
        );

        let results =
            orchestrator::generate_all(&self.renderer, &panels, &working_dir, Some(&events));
        let names = BundleNames::at(Local::now());
        let bundle = match assemble(&results, &panels.descriptions(), &working_dir, &names) {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!(
                    request = %request_id,
                    error = %err,
                    "assembly failed; scope left for cleanup"
                );
                schedule_cleanup(working_dir, self.config.cleanup_delay);
                return Err(err);
            }
        };

        let fallback_panels = results.iter().filter(|result| result.used_fallback).count();
        record(
            &events,
            ComicEvent::BundleAssembled {
                archive: names.archive_name(),
                document: names.document_name(),
                document_degraded: bundle.document_degraded,
                fallback_panels,
            },
        );

        let cleanup = schedule_cleanup(working_dir.clone(), self.config.cleanup_delay);
        record(
            &events,
            ComicEvent::CleanupScheduled {
                working_dir: working_dir.display().to_string(),
                delay_s: self.config.cleanup_delay.as_secs(),
            },
        );
        info!(
            request = %request_id,
            archive = %bundle.archive_path.display(),
            fallback_panels,
            "comic generation finished"
        );

        Ok(ComicRun {
            request_id,
            working_dir,
            results,
            bundle,
            cleanup,
        })
    }

    /// Looks up a finished deliverable by file name.
    pub fn find(&self, name: &str) -> Result<PathBuf, ComicError> {
        self.store.find(name)
    }
}

fn record(events: &EventWriter, event: ComicEvent) {
    if let Err(err) = events.emit(&event) {
        warn!(
            path = %events.path().display(),
            error = %err,
            "failed to record event"
        );
    }
}
