use std::fs;
use std::path::Path;
use std::thread;

use inkframe_contracts::{
    panel_file_name, ComicEvent, EventWriter, PanelDescriptor, PanelSet, RenderResult,
};
use sha2::{Digest, Sha256};
use tracing::{error, warn};

use crate::render::{write_placeholder, PanelRenderer};

/// Renders every panel of `panels` concurrently, one worker thread per panel.
///
/// Returns one result per descriptor, ascending by index, once all workers are done.
/// A worker that dies is replaced by a placeholder for its panel.
pub fn generate_all(
    renderer: &PanelRenderer,
    panels: &PanelSet,
    working_dir: &Path,
    events: Option<&EventWriter>,
) -> Vec<RenderResult> {
    let mut results: Vec<RenderResult> = thread::scope(|scope| {
        let mut pending = Vec::with_capacity(panels.len());
        for descriptor in panels.descriptors() {
            let spawned = thread::Builder::new()
                .name(format!("inkframe-panel-{:02}", descriptor.index()))
                .spawn_scoped(scope, move || renderer.render(descriptor, working_dir));
            match spawned {
                Ok(handle) => pending.push((descriptor, Some(handle))),
                Err(err) => {
                    warn!(
                        panel = descriptor.index(),
                        error = %err,
                        "panel worker spawn failed; rendering inline"
                    );
                    pending.push((descriptor, None));
                }
            }
        }

        pending
            .into_iter()
            .map(|(descriptor, handle)| match handle {
                Some(handle) => handle
                    .join()
                    .unwrap_or_else(|_| worker_died(descriptor, working_dir)),
                None => renderer.render(descriptor, working_dir),
            })
            .collect()
    });

    results.sort_by_key(|result| result.index);
    if let Some(events) = events {
        for result in &results {
            emit_rendered(events, result);
        }
    }
    results
}

fn worker_died(descriptor: &PanelDescriptor, working_dir: &Path) -> RenderResult {
    let image_path = working_dir.join(panel_file_name(descriptor.index()));
    error!(panel = descriptor.index(), "panel worker panicked");
    write_placeholder(descriptor, &image_path);
    RenderResult {
        index: descriptor.index(),
        image_path,
        used_fallback: true,
        fallback_reason: Some("panel worker panicked".to_string()),
    }
}

fn emit_rendered(events: &EventWriter, result: &RenderResult) {
    let sha256 = fs::read(&result.image_path)
        .ok()
        .map(|bytes| hex::encode(Sha256::digest(&bytes)));
    let event = ComicEvent::PanelRendered {
        index: result.index,
        used_fallback: result.used_fallback,
        fallback_reason: result.fallback_reason.clone(),
        image_path: result.image_path.display().to_string(),
        sha256,
    };
    if let Err(err) = events.emit(&event) {
        warn!(
            panel = result.index,
            error = %err,
            "failed to record panel event"
        );
    }
}
