#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use inkframe_contracts::{PanelMode, PanelPrompt, ProviderError};
use inkframe_engine::{EngineKind, ImageBytes, ImageProvider, PipelineConfig, StyleHints};
use serde_json::Value;
use tempfile::TempDir;
use zip::ZipArchive;

pub const PROVIDER_COLOR: Rgb<u8> = Rgb([30, 120, 60]);

pub struct TestEnv {
    _tmp: TempDir,
    pub root: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let root = tmp.path().join("store");
        Self { _tmp: tmp, root }
    }

    pub fn config(&self, engine: EngineKind, mode: PanelMode) -> PipelineConfig {
        let mut config = PipelineConfig::new(engine, mode, &self.root);
        config.cleanup_delay = Duration::from_secs(3600);
        config
    }

    pub fn scope_dirs(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();
        dirs
    }

    pub fn event_types(&self) -> Vec<String> {
        read_events(&self.root.join("events.jsonl"))
            .iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect()
    }
}

pub fn read_events(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

pub fn robot_prompts() -> Vec<PanelPrompt> {
    vec![
        PanelPrompt::new("A robot explores a ruin", Some("Systems nominal.")),
        PanelPrompt::new("The robot finds a door", Some("Curious.")),
    ]
}

pub fn numbered_prompts(count: usize) -> Vec<PanelPrompt> {
    (1..=count)
        .map(|i| PanelPrompt::new(format!("scene {i:02} of the voyage"), None))
        .collect()
}

/// Solid-color images, failing whenever the prompt contains one of `fail_on`.
pub struct ScriptedProvider {
    fail_on: Vec<String>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(fail_on: &[&str]) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Self {
            fail_on: fail_on.iter().map(|needle| needle.to_string()).collect(),
            calls: Arc::clone(&calls),
        };
        (provider, calls)
    }
}

impl ImageProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn synthesize(&self, prompt: &str, hints: &StyleHints) -> Result<ImageBytes, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .fail_on
            .iter()
            .find(|needle| prompt.contains(needle.as_str()));
        if let Some(needle) = refused {
            return Err(ProviderError::new(
                "scripted",
                format!("refused prompt containing '{needle}'"),
            ));
        }
        // Deliberately off-size so normalization is exercised.
        let image = RgbImage::from_pixel(hints.width / 2, hints.height / 2, PROVIDER_COLOR);
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| ProviderError::new("scripted", err.to_string()))?;
        Ok(ImageBytes {
            bytes,
            mime_type: Some("image/png".to_string()),
        })
    }
}

pub fn archive_entries(path: &Path) -> Vec<String> {
    let file = File::open(path).expect("open archive");
    let mut archive = ZipArchive::new(file).expect("read archive");
    (0..archive.len())
        .map(|i| archive.by_index(i).map(|entry| entry.name().to_string()))
        .collect::<Result<_, _>>()
        .expect("archive entries")
}

pub fn document_stats(path: &Path) -> (usize, usize, String) {
    let doc = lopdf::Document::load(path).expect("load document");
    let images = doc
        .objects
        .values()
        .filter(|object| match object {
            lopdf::Object::Stream(stream) => matches!(
                stream.dict.get(b"Subtype"),
                Ok(lopdf::Object::Name(name)) if name == b"Image"
            ),
            _ => false,
        })
        .count();
    let mut text = String::new();
    for page_id in doc.get_pages().values() {
        let content = doc.get_page_content(*page_id).expect("page content");
        text.push_str(&String::from_utf8_lossy(&content));
    }
    (doc.get_pages().len(), images, text)
}
