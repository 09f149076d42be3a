//! Environment configuration.
//!
//! Every variable is read once at boot; a missing required variable or an
//! unparsable value aborts startup with a diagnostic naming the variable.

use glimmer_core::workflow::UpscaleKind;

/// Configuration errors carry the offending variable name.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Runtime configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bot token for the chat platform.
    pub token: String,
    /// Application id on the chat platform.
    pub app_id: String,
    /// The scope (guild) the bot serves.
    pub scope_id: String,
    /// Channels the entry command is accepted in.
    pub allowed_channel_ids: Vec<String>,
    pub backend_base_url: String,
    /// Per-job poll deadline in milliseconds.
    pub backend_timeout_ms: u64,
    pub db_path: String,
    pub log_level: String,
    pub default_negative_prompt: String,
    pub upscale_model: String,
    pub upscale_workflow: UpscaleKind,
    pub upscale_enabled: bool,
    pub owner_id: String,
    pub purge_max_age_hours: u64,
    pub purge_interval_hours: u64,
    pub civitai_api_key: Option<String>,
    /// Directory holding the template graph files.
    pub workflows_dir: String,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary lookup function (tests inject maps here).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| -> Result<String, ConfigError> {
            match lookup(var) {
                Some(value) if !value.trim().is_empty() => Ok(value),
                _ => Err(ConfigError::Missing(var)),
            }
        };
        let optional = |var: &'static str| -> Option<String> {
            lookup(var).filter(|v| !v.trim().is_empty())
        };

        let backend_timeout_ms = parse_u64(optional("BACKEND_TIMEOUT_MS"), "BACKEND_TIMEOUT_MS", 300_000)?;
        let purge_max_age_hours = parse_u64(optional("PURGE_MAX_AGE_HOURS"), "PURGE_MAX_AGE_HOURS", 48)?;
        let purge_interval_hours = parse_u64(optional("PURGE_INTERVAL_HOURS"), "PURGE_INTERVAL_HOURS", 6)?;
        let upscale_enabled = parse_bool(optional("UPSCALE_ENABLED"), "UPSCALE_ENABLED", false)?;
        let upscale_workflow = parse_upscale_kind(optional("UPSCALE_WORKFLOW"))?;

        let allowed_channel_ids = optional("ALLOWED_CHANNEL_IDS")
            .map(|csv| {
                csv.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            token: required("TOKEN")?,
            app_id: required("APP_ID")?,
            scope_id: required("SCOPE_ID")?,
            allowed_channel_ids,
            backend_base_url: optional("BACKEND_BASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8188".to_string()),
            backend_timeout_ms,
            db_path: required("DB_PATH")?,
            log_level: optional("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            default_negative_prompt: optional("DEFAULT_NEGATIVE_PROMPT").unwrap_or_default(),
            upscale_model: required("UPSCALE_MODEL")?,
            upscale_workflow,
            upscale_enabled,
            owner_id: required("OWNER_ID")?,
            purge_max_age_hours,
            purge_interval_hours,
            civitai_api_key: optional("CIVITAI_API_KEY"),
            workflows_dir: optional("WORKFLOWS_DIR").unwrap_or_else(|| "./workflows".to_string()),
        })
    }

    pub fn is_channel_allowed(&self, channel_id: &str) -> bool {
        self.allowed_channel_ids.iter().any(|id| id == channel_id)
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

fn parse_u64(
    value: Option<String>,
    var: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("expected an integer, got '{raw}'"),
        }),
    }
}

fn parse_bool(
    value: Option<String>,
    var: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::trim) {
        None => Ok(default),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some("false") | Some("0") | Some("no") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            var,
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_upscale_kind(value: Option<String>) -> Result<UpscaleKind, ConfigError> {
    match value.as_deref().map(str::trim) {
        None | Some("ultimate") => Ok(UpscaleKind::Ultimate),
        Some("simple") => Ok(UpscaleKind::Simple),
        Some(other) => Err(ConfigError::Invalid {
            var: "UPSCALE_WORKFLOW",
            reason: format!("expected 'ultimate' or 'simple', got '{other}'"),
        }),
    }
}
