//! Configuration
//!
//! `StrandConfig` is read from `~/.strand/config.toml`. A missing file gives
//! defaults; a malformed one is an error naming the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::agent::user_hooks::HooksConfig;
use crate::ai::retry::RetryConfig;
use crate::constants::thread as limits;
use crate::paths;

/// Model and transport settings for one thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    pub model: String,
    /// Cheap model for compaction and summaries; empty falls back to `model`
    pub weak_model: String,
    pub max_tokens: u32,
    pub weak_model_max_tokens: u32,
    /// Reasoning budget; 0 disables thinking
    pub thinking_budget_tokens: u32,
    pub temperature: f32,
    pub retry: RetryConfig,
    /// Overrides the provider's context window for this model
    pub context_window: Option<u64>,
    pub system_prompt: Option<String>,
    #[serde(skip)]
    pub is_sub_agent: bool,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            weak_model: String::new(),
            max_tokens: limits::DEFAULT_MAX_TOKENS,
            weak_model_max_tokens: limits::DEFAULT_WEAK_MODEL_MAX_TOKENS,
            thinking_budget_tokens: 0,
            temperature: 1.0,
            retry: RetryConfig::default(),
            context_window: None,
            system_prompt: None,
            is_sub_agent: false,
        }
    }
}

impl ThreadConfig {
    /// Model to use for a call, honouring `use_weak_model`
    pub fn model_for(&self, use_weak_model: bool) -> &str {
        if use_weak_model && !self.weak_model.is_empty() {
            &self.weak_model
        } else {
            &self.model
        }
    }

    /// Output budget matching `model_for`
    pub fn max_tokens_for(&self, use_weak_model: bool) -> u32 {
        if use_weak_model && !self.weak_model.is_empty() && self.weak_model_max_tokens > 0 {
            self.weak_model_max_tokens
        } else {
            self.max_tokens
        }
    }

    /// Settings for a helper thread working on this thread's behalf
    pub fn for_helper(&self) -> Self {
        Self {
            is_sub_agent: true,
            ..self.clone()
        }
    }
}

/// Per-call options for `Thread::send_message`
#[derive(Debug, Clone)]
pub struct MessageOpt {
    pub use_weak_model: bool,
    /// Offer no tools to the model
    pub no_tool_use: bool,
    pub no_save_conversation: bool,
    /// Image references attached to the message
    pub images: Vec<String>,
    /// Values <= 0 mean the default of 10
    pub max_turns: i32,
    pub compact_ratio: f64,
    pub disable_auto_compact: bool,
    pub disable_usage_log: bool,
    /// Caller's cancellation scope; firing it ends the loop without error
    pub cancel: CancellationToken,
}

impl Default for MessageOpt {
    fn default() -> Self {
        Self {
            use_weak_model: false,
            no_tool_use: false,
            no_save_conversation: false,
            images: Vec::new(),
            max_turns: limits::DEFAULT_MAX_TURNS as i32,
            compact_ratio: limits::DEFAULT_COMPACT_RATIO,
            disable_auto_compact: false,
            disable_usage_log: false,
            cancel: CancellationToken::new(),
        }
    }
}

impl MessageOpt {
    pub fn effective_max_turns(&self) -> usize {
        if self.max_turns <= 0 {
            limits::DEFAULT_MAX_TURNS
        } else {
            self.max_turns as usize
        }
    }

    /// Options used for compaction and summary helper calls
    pub(crate) fn helper() -> Self {
        Self {
            use_weak_model: true,
            no_tool_use: true,
            no_save_conversation: true,
            max_turns: 1,
            disable_auto_compact: true,
            disable_usage_log: true,
            ..Default::default()
        }
    }
}

/// Contents of `~/.strand/config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrandConfig {
    pub thread: ThreadConfig,
    pub hooks: HooksConfig,
    pub database_path: Option<PathBuf>,
}

impl StrandConfig {
    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from_path(&paths::config_file())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: StrandConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        tracing::info!(path = %path.display(), model = %config.thread.model, "Loaded config");
        Ok(config)
    }

    /// Configured database path or `~/.strand/strand.db`
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(paths::database_path)
    }
}
