//! Application-wide constants

use std::time::Duration;

/// Directory and file names
pub mod dirs {
    pub const CONFIG_DIR_NAME: &str = ".strand";
    pub const CONFIG_FILE_NAME: &str = "config.toml";
    pub const DATABASE_FILE_NAME: &str = "strand.db";
    pub const LOG_FILE_NAME: &str = "strand.log";
}

/// Exchange loop limits
pub mod thread {
    /// Used when a caller passes `max_turns <= 0`
    pub const DEFAULT_MAX_TURNS: usize = 10;
    /// Context window assumed when the config does not name one
    pub const DEFAULT_CONTEXT_WINDOW: u64 = 200_000;
    pub const DEFAULT_MAX_TOKENS: u32 = 8192;
    pub const DEFAULT_WEAK_MODEL_MAX_TOKENS: u32 = 4096;
    /// Context usage fraction that triggers auto-compaction
    pub const DEFAULT_COMPACT_RATIO: f64 = 0.8;
    /// Floor for the chars/4 context estimate
    pub const MIN_ESTIMATED_CONTEXT_TOKENS: u64 = 100;
}

/// Image attachment limits
pub mod images {
    pub const MAX_IMAGE_COUNT: usize = 10;
    pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
    pub const MAX_REDIRECTS: usize = 10;
    pub const SUPPORTED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];
}

/// Hook command timeout
pub const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-call tool timeout enforced by the registry
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Time an image URL fetch may take end to end
pub const IMAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace window between SIGTERM and SIGKILL for background process groups
pub const PROCESS_TERMINATE_GRACE: Duration = Duration::from_secs(5);
