//! Service configuration.
//!
//! Everything is read from the environment (after `.env` is loaded). The LLM key
//! is mandatory; Supabase is optional and history is simply disabled without it.

use anyhow::{Context, Result};
use tracing::warn;

use crate::batch_store::DEFAULT_MAX_BATCHES;
use crate::export::ExportFormat;

const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_CHAR_LIMIT: usize = 12_000;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Top-level settings for the server.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub max_upload_bytes: usize,
    /// Editable batches held in memory before the oldest is dropped.
    pub max_batches: usize,
    pub default_export: ExportFormat,
    pub llm: LlmSettings,
    pub supabase: Option<SupabaseSettings>,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub model: String,
    pub api_url: String,
    /// Maximum number of characters of document text sent to the model.
    pub char_limit: usize,
}

#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub url: String,
    pub service_role_key: String,
}

impl Settings {
    /// Read settings from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY environment variable not set")?;

        let llm = LlmSettings {
            api_key,
            model: get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_url: get("OPENROUTER_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            char_limit: parse_or(get("EXTRACT_CHAR_LIMIT"), "EXTRACT_CHAR_LIMIT", DEFAULT_CHAR_LIMIT)?,
        };

        let supabase = match (get("SUPABASE_URL"), get("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseSettings {
                url: url.trim_end_matches('/').to_string(),
                service_role_key,
            }),
            (None, None) => {
                warn!("Supabase not configured. History will not be saved.");
                None
            }
            _ => {
                warn!("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must both be set. History will not be saved.");
                None
            }
        };

        let default_export = match get("DEFAULT_EXPORT_FORMAT") {
            Some(v) => ExportFormat::parse(&v)
                .with_context(|| format!("DEFAULT_EXPORT_FORMAT must be csv or xlsx, got {:?}", v))?,
            None => ExportFormat::Xlsx,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            max_upload_bytes: parse_or(get("MAX_UPLOAD_BYTES"), "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            max_batches: parse_or(get("MAX_BATCHES"), "MAX_BATCHES", DEFAULT_MAX_BATCHES)?,
            default_export,
            llm,
            supabase,
        })
    }
}

fn parse_or(value: Option<String>, key: &str, default: usize) -> Result<usize> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{} must be a positive integer, got {:?}", key, v)),
        None => Ok(default),
    }
}
