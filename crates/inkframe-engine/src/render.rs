use std::fs;
use std::io;
use std::path::Path;

use anyhow::Context;
use image::RgbImage;
use inkframe_contracts::{panel_file_name, ComicError, PanelDescriptor, ProviderError, RenderResult};
use tracing::{error, info, warn};

use crate::canvas::{composite_dialogue, encode_png, normalize_provider_image, placeholder_png};
use crate::providers::{ProviderSlot, StyleHints};

pub const COMIC_STYLE_PREFIX: &str = "comic book style";

/// Renders one panel into the request's working directory.
///
/// `render` never fails: any configuration, provider, decode or write problem turns
/// into a placeholder written at the same canonical path.
pub struct PanelRenderer {
    slot: ProviderSlot,
    hints: StyleHints,
}

impl PanelRenderer {
    pub fn new(slot: ProviderSlot) -> Self {
        Self {
            slot,
            hints: StyleHints::default(),
        }
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.slot.name()
    }

    pub fn render(&self, descriptor: &PanelDescriptor, working_dir: &Path) -> RenderResult {
        let index = descriptor.index();
        let image_path = working_dir.join(panel_file_name(index));
        info!(
            panel = index,
            provider = self.provider_name().unwrap_or("none"),
            "panel render started"
        );
        match self.synthesize_panel(descriptor, &image_path) {
            Ok(()) => {
                info!(
                    panel = index,
                    path = %image_path.display(),
                    "panel rendered"
                );
                RenderResult {
                    index,
                    image_path,
                    used_fallback: false,
                    fallback_reason: None,
                }
            }
            Err(err) => {
                warn!(
                    panel = index,
                    kind = err.kind(),
                    error = %err,
                    "panel falling back to placeholder"
                );
                write_placeholder(descriptor, &image_path);
                RenderResult {
                    index,
                    image_path,
                    used_fallback: true,
                    fallback_reason: Some(err.to_string()),
                }
            }
        }
    }

    fn synthesize_panel(
        &self,
        descriptor: &PanelDescriptor,
        image_path: &Path,
    ) -> Result<(), ComicError> {
        let provider = match &self.slot {
            ProviderSlot::Ready(provider) => provider,
            ProviderSlot::Unavailable(reason) => {
                return Err(ComicError::Configuration(reason.clone()));
            }
        };

        let prompt = build_prompt(descriptor, provider.renders_dialogue());
        let image = provider.synthesize(&prompt, &self.hints)?;
        let mut canvas = normalize_provider_image(&image.bytes)
            .map_err(|err| ProviderError::from_chain(provider.name(), &err))?;

        if let Some(dialogue) = descriptor.dialogue() {
            if !provider.renders_dialogue() {
                composite_dialogue(&mut canvas, dialogue);
            }
        }

        save_png(&canvas, image_path)
    }
}

/// Encodes `canvas` as PNG at `image_path`. Both failure modes surface as I/O errors
/// on the panel file.
fn save_png(canvas: &RgbImage, image_path: &Path) -> Result<(), ComicError> {
    let encoded = encode_png(canvas)
        .map_err(|err| ComicError::io(image_path, io::Error::other(format!("{err:#}"))))?;
    fs::write(image_path, encoded).map_err(|err| ComicError::io(image_path, err))
}

/// Provider prompt for one panel. Dialogue is only spelled out for backends that
/// draw their own speech bubble.
pub fn build_prompt(descriptor: &PanelDescriptor, renders_dialogue: bool) -> String {
    let mut prompt = format!(
        "{COMIC_STYLE_PREFIX}, {}, high quality, detailed illustration",
        descriptor.description()
    );
    if renders_dialogue {
        if let Some(line) = descriptor.dialogue() {
            prompt.push_str(&format!(
                ". Include one speech bubble containing exactly the words: \"{line}\""
            ));
        }
    }
    prompt
}

/// Best-effort placeholder write; a failure is logged and the result still points at
/// `image_path`.
pub(crate) fn write_placeholder(descriptor: &PanelDescriptor, image_path: &Path) {
    if let Err(err) = save_placeholder(descriptor, image_path) {
        error!(
            panel = descriptor.index(),
            error = %format!("{err:#}"),
            "placeholder could not be written"
        );
    }
}

fn save_placeholder(descriptor: &PanelDescriptor, image_path: &Path) -> anyhow::Result<()> {
    let bytes = placeholder_png(descriptor.index(), descriptor.description())?;
    fs::write(image_path, bytes)
        .with_context(|| format!("failed to write {}", image_path.display()))
}
