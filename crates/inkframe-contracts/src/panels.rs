use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ComicError;

pub const PREVIEW_PANEL_COUNT: usize = 2;
pub const FULL_PANEL_COUNT: usize = 10;

/// Fixed panel count a pipeline accepts. Requests with any other count are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PanelMode {
    Preview,
    #[default]
    Full,
}

impl PanelMode {
    pub fn panel_count(self) -> usize {
        match self {
            Self::Preview => PREVIEW_PANEL_COUNT,
            Self::Full => FULL_PANEL_COUNT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for PanelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PanelMode {
    type Err = ComicError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "preview" | "dev" | "2" => Ok(Self::Preview),
            "full" | "10" => Ok(Self::Full),
            other => Err(ComicError::Configuration(format!(
                "unknown panel mode '{other}' (expected preview or full)"
            ))),
        }
    }
}

/// Upstream shape of one panel: what the prompt generator returns and what callers submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelPrompt {
    pub description: String,
    #[serde(default)]
    pub dialogue: Option<String>,
}

impl PanelPrompt {
    pub fn new(description: impl Into<String>, dialogue: Option<&str>) -> Self {
        Self {
            description: description.into(),
            dialogue: dialogue.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelDescriptor {
    index: u32,
    description: String,
    dialogue: Option<String>,
}

impl PanelDescriptor {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn dialogue(&self) -> Option<&str> {
        self.dialogue.as_deref()
    }
}

/// An ordered, validated list of descriptors with indices `1..=N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelSet {
    mode: PanelMode,
    descriptors: Vec<PanelDescriptor>,
}

impl PanelSet {
    pub fn from_prompts(prompts: Vec<PanelPrompt>, mode: PanelMode) -> Result<Self, ComicError> {
        let expected = mode.panel_count();
        if prompts.len() != expected {
            return Err(ComicError::Validation(format!(
                "exactly {expected} panels are required in {mode} mode, got {}",
                prompts.len()
            )));
        }

        let mut descriptors = Vec::with_capacity(prompts.len());
        for (offset, prompt) in prompts.into_iter().enumerate() {
            let index = offset as u32 + 1;
            let description = prompt.description.trim().to_string();
            if description.is_empty() {
                return Err(ComicError::Validation(format!(
                    "panel {index} has an empty description"
                )));
            }
            let dialogue = prompt
                .dialogue
                .map(|line| clean_dialogue(&line))
                .filter(|line| !line.is_empty());
            descriptors.push(PanelDescriptor {
                index,
                description,
                dialogue,
            });
        }
        Ok(Self { mode, descriptors })
    }

    pub fn mode(&self) -> PanelMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptors(&self) -> &[PanelDescriptor] {
        &self.descriptors
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.descriptors
            .iter()
            .map(|descriptor| descriptor.description.clone())
            .collect()
    }
}

/// Outcome of rendering one panel. Always produced, even when synthesis failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderResult {
    pub index: u32,
    pub image_path: PathBuf,
    pub used_fallback: bool,
    pub fallback_reason: Option<String>,
}

/// Parses a panel list as produced by a language model or written by hand.
///
/// Accepts a bare JSON array, or an object holding the array under `prompts` or
/// `panels`. Markdown code fences around the payload are ignored.
pub fn parse_prompt_list(raw: &str) -> Result<Vec<PanelPrompt>, ComicError> {
    let body = strip_code_fence(raw);
    let parsed: Value = serde_json::from_str(body)
        .map_err(|err| ComicError::Validation(format!("panel list is not valid JSON: {err}")))?;
    let rows = match parsed {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match obj.remove("prompts").or_else(|| obj.remove("panels")) {
            Some(Value::Array(rows)) => rows,
            _ => {
                return Err(ComicError::Validation(
                    "panel list object must hold an array under 'prompts' or 'panels'"
                        .to_string(),
                ));
            }
        },
        _ => {
            return Err(ComicError::Validation(
                "panel list must be a JSON array".to_string(),
            ));
        }
    };

    rows.into_iter()
        .enumerate()
        .map(|(offset, row)| {
            serde_json::from_value::<PanelPrompt>(row).map_err(|err| {
                ComicError::Validation(format!("panel {} is malformed: {err}", offset + 1))
            })
        })
        .collect()
}

/// Truncates to `max_chars` characters, marking the cut with `...`.
pub fn truncate_caption(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

fn clean_dialogue(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|ch: char| ch.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
