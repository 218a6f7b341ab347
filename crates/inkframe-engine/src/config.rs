use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use inkframe_contracts::{ComicError, PanelMode};

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(3600);

const MISSING_ENGINE: &str =
    "RENDERING_ENGINE is not set; choose replicate, openai, huggingface or placeholder";

/// The closed set of synthesis backends a pipeline can be built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Replicate,
    OpenAi,
    HuggingFace,
    /// No remote provider; every panel is a locally rendered placeholder.
    Placeholder,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        EngineKind::Replicate,
        EngineKind::OpenAi,
        EngineKind::HuggingFace,
        EngineKind::Placeholder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replicate => "replicate",
            Self::OpenAi => "openai",
            Self::HuggingFace => "huggingface",
            Self::Placeholder => "placeholder",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = ComicError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "replicate" => Ok(Self::Replicate),
            "openai" => Ok(Self::OpenAi),
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "placeholder" | "none" => Ok(Self::Placeholder),
            other => Err(ComicError::Configuration(format!(
                "unknown rendering engine '{other}' (expected one of: {})",
                EngineKind::ALL
                    .iter()
                    .map(|kind| kind.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub replicate_token: Option<String>,
    pub openai_key: Option<String>,
    pub hf_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiBases {
    pub replicate: Option<String>,
    pub openai: Option<String>,
    pub huggingface: Option<String>,
}

/// Fully resolved pipeline settings. Built once, before the pipeline exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub engine: EngineKind,
    pub mode: PanelMode,
    pub provider_timeout: Duration,
    pub poll_timeout: Duration,
    pub cleanup_delay: Duration,
    pub storage_root: PathBuf,
    pub credentials: Credentials,
    pub api_bases: ApiBases,
    pub font_path: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn new(engine: EngineKind, mode: PanelMode, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            mode,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
            storage_root: storage_root.into(),
            credentials: Credentials::default(),
            api_bases: ApiBases::default(),
            font_path: None,
        }
    }

    pub fn from_env() -> Result<Self, ComicError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves configuration through `lookup` (an environment-like source).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ComicError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let engine = get("RENDERING_ENGINE")
            .ok_or_else(|| ComicError::Configuration(MISSING_ENGINE.to_string()))?
            .parse::<EngineKind>()?;
        let mode = match get("COMIC_PANEL_MODE") {
            Some(raw) => raw.parse::<PanelMode>()?,
            None => PanelMode::default(),
        };
        let storage_root = get("COMIC_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(default_storage_root);

        let mut config = Self::new(engine, mode, storage_root);
        config.provider_timeout =
            seconds(&get, "COMIC_PROVIDER_TIMEOUT_SECS")?.unwrap_or(DEFAULT_PROVIDER_TIMEOUT);
        config.poll_timeout =
            seconds(&get, "COMIC_POLL_TIMEOUT_SECS")?.unwrap_or(DEFAULT_POLL_TIMEOUT);
        config.cleanup_delay =
            seconds(&get, "COMIC_CLEANUP_DELAY_SECS")?.unwrap_or(DEFAULT_CLEANUP_DELAY);
        config.credentials = Credentials {
            replicate_token: get("REPLICATE_API_TOKEN").or_else(|| get("REPLICATE_API_KEY")),
            openai_key: get("OPENAI_API_KEY"),
            hf_token: get("HF_API_TOKEN"),
        };
        config.api_bases = ApiBases {
            replicate: get("REPLICATE_API_BASE"),
            openai: get("OPENAI_API_BASE"),
            huggingface: get("HF_API_BASE"),
        };
        config.font_path = get("COMIC_FONT_PATH").map(PathBuf::from);
        Ok(config)
    }

    /// The credential the configured engine needs, if it has one.
    pub fn engine_credential(&self) -> Option<&str> {
        match self.engine {
            EngineKind::Replicate => self.credentials.replicate_token.as_deref(),
            EngineKind::OpenAi => self.credentials.openai_key.as_deref(),
            EngineKind::HuggingFace => self.credentials.hf_token.as_deref(),
            EngineKind::Placeholder => None,
        }
    }

    pub fn events_path(&self) -> PathBuf {
        self.storage_root.join("events.jsonl")
    }
}

pub fn default_storage_root() -> PathBuf {
    std::env::temp_dir().join("inkframe")
}

fn seconds<G>(get: &G, key: &str) -> Result<Option<Duration>, ComicError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        Err(_) => Err(ComicError::Configuration(format!(
            "{key} must be whole seconds, got '{raw}'"
        ))),
    }
}
