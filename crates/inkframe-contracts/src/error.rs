use std::path::PathBuf;

use thiserror::Error;

/// Failure surface of the comic pipeline.
///
/// Only `Validation`, `Configuration` (at construction) and `Assembly` ever reach a
/// caller of the pipeline. Per-panel failures are absorbed by the renderer and show up
/// as flagged placeholder results instead.
#[derive(Debug, Error)]
pub enum ComicError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("assembly failed: {0}")]
    Assembly(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ComicError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Provider(_) => "provider",
            Self::Io { .. } => "io",
            Self::Validation(_) => "validation",
            Self::Assembly(_) => "assembly",
            Self::NotFound(_) => "not_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider} provider error: {reason}")]
pub struct ProviderError {
    pub provider: String,
    pub reason: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Flattens an `anyhow` chain into a single bounded reason string.
    pub fn from_chain(provider: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::new(provider, error_chain_text(err, 512))
    }
}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|last| last == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_chars(&err.to_string(), max_chars);
    }
    truncate_chars(&parts.join(" | caused by: "), max_chars)
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
