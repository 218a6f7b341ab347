use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use inkframe_contracts::{
    parse_prompt_list, ComicError, PanelMode, PanelPrompt, PanelSet, ProviderError,
};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tracing::info;

use crate::config::PipelineConfig;
use crate::providers::{api_base, response_json_or_error, OPENAI_API_BASE};

const CHAT_MODEL: &str = "gpt-4";
const CHAT_TEMPERATURE: f64 = 0.8;
const CHAT_MAX_TOKENS: u32 = 1500;
const CHAT_MIN_TIMEOUT: Duration = Duration::from_secs(60);
const MISSING_KEY: &str = "OPENAI_API_KEY is required to generate panel prompts";

/// The three free-text fields a story starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryBrief {
    pub genre: String,
    pub setting: String,
    pub characters: String,
}

/// Turns a `StoryBrief` into exactly N panel prompts with one chat-completions call.
pub struct PromptGenerator {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl PromptGenerator {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ComicError> {
        let api_key = config
            .credentials
            .openai_key
            .clone()
            .ok_or_else(|| ComicError::Configuration(MISSING_KEY.to_string()))?;
        let http = HttpClient::builder()
            .timeout(config.provider_timeout.max(CHAT_MIN_TIMEOUT))
            .build()
            .map_err(|err| ComicError::Configuration(format!("HTTP client setup failed: {err}")))?;
        Ok(Self {
            api_base: api_base(config.api_bases.openai.as_deref(), OPENAI_API_BASE),
            api_key,
            http,
        })
    }

    pub fn generate(
        &self,
        brief: &StoryBrief,
        mode: PanelMode,
    ) -> Result<Vec<PanelPrompt>, ComicError> {
        let count = mode.panel_count();
        let text = self
            .request(brief, count)
            .map_err(|err| ProviderError::from_chain("openai-chat", &err))?;
        let prompts = parse_prompt_list(&text)?;
        PanelSet::from_prompts(prompts.clone(), mode)?;
        info!(
            panels = prompts.len(),
            mode = %mode,
            "panel prompts generated"
        );
        Ok(prompts)
    }

    fn request(&self, brief: &StoryBrief, count: usize) -> Result<String> {
        let endpoint = format!("{}/chat/completions", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&chat_payload(brief, count))
            .send()
            .with_context(|| format!("chat request failed ({endpoint})"))?;
        let payload = response_json_or_error("OpenAI chat", response)?;
        completion_text(&payload).map(str::to_string)
    }
}

pub fn system_prompt(count: usize) -> String {
    format!(
        "You are a creative comic book illustrator and storyteller. \
         Your task is to generate exactly {count} detailed illustration prompts \
         for a comic book.\n\n\
         For each panel, provide:\n\
         - 'description': a vivid, visual prompt for AI image generation (1-2 sentences)\n\
         - 'dialogue': a short line of character dialogue for a speech bubble (1 sentence)\n\n\
         Return ONLY a JSON array of {count} objects, each with 'description' and 'dialogue'.\n\
         Example format: [{{\"description\": \"A robot detective in a space station...\", \
         \"dialogue\": \"We have a problem!\"}}]\n\
         No other text."
    )
}

pub fn user_prompt(brief: &StoryBrief, count: usize) -> String {
    format!(
        "Create {count} comic panels for:\nGenre: {}\nSetting: {}\nCharacters: {}\n\n\
         Each panel should progress the story.",
        brief.genre.trim(),
        brief.setting.trim(),
        brief.characters.trim()
    )
}

fn chat_payload(brief: &StoryBrief, count: usize) -> Value {
    json!({
        "model": CHAT_MODEL,
        "messages": [
            {"role": "system", "content": system_prompt(count)},
            {"role": "user", "content": user_prompt(brief, count)},
        ],
        "temperature": CHAT_TEMPERATURE,
        "max_tokens": CHAT_MAX_TOKENS,
    })
}

fn completion_text(payload: &Value) -> Result<&str> {
    payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .ok_or_else(|| anyhow!("chat response carried no message content"))
}
