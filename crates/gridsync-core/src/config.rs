//! Session configuration: defaults, YAML file overlay, environment overrides.
//!
//! Precedence: defaults < config file < `GRIDSYNC_*` environment variables.
//! An explicitly named config file that cannot be read is a hard error; the
//! default search path is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::types::Extent;

pub const DEFAULT_DEBOUNCE_MS: u64 = 700;
pub const DEFAULT_STATUS_CLEAR_MS: u64 = 900;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiet period after the last keystroke before a cell is written.
    pub debounce: Duration,
    /// How long the "saved" status stays visible.
    pub status_clear: Duration,
    /// Extent given to new sheets and to sheets stored without one.
    pub default_extent: Extent,
    /// Name of the sheet created when the store has none.
    pub default_sheet_name: String,
    /// Fixed set of checklist labels offered by the annotation editor.
    pub checklist_labels: Vec<String>,
    /// SQLite database file used by the bundled store.
    pub database_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            status_clear: Duration::from_millis(DEFAULT_STATUS_CLEAR_MS),
            default_extent: Extent::new(100, 100),
            default_sheet_name: "Sheet1".to_string(),
            checklist_labels: vec![
                "Requirements confirmed".to_string(),
                "Format confirmed".to_string(),
                "Supervisor approved".to_string(),
            ],
            database_path: None,
        }
    }
}

impl SyncConfig {
    /// Validates the configuration, returning an error message on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.debounce.is_zero() {
            return Err("debounce_ms must be greater than 0".into());
        }
        if self.default_extent.max_rows == 0 || self.default_extent.max_cols == 0 {
            return Err("default_rows and default_cols must be at least 1".into());
        }
        if self.default_sheet_name.trim().is_empty() {
            return Err("default_sheet_name is required".into());
        }
        if self.checklist_labels.is_empty() {
            return Err("checklist_labels must name at least one label".into());
        }
        let mut seen = std::collections::HashSet::new();
        for label in &self.checklist_labels {
            if label.trim().is_empty() {
                return Err("checklist_labels must not contain empty labels".into());
            }
            if !seen.insert(label.as_str()) {
                return Err(format!("checklist label {label:?} is duplicated"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    #[serde(default)]
    debounce_ms: u64,
    #[serde(default)]
    status_clear_ms: u64,
    #[serde(default)]
    default_rows: u32,
    #[serde(default)]
    default_cols: u32,
    #[serde(default)]
    default_sheet_name: String,
    #[serde(default)]
    checklist_labels: Vec<String>,
    #[serde(default)]
    database_path: String,
}

/// Load config from `config_file` (or the default search path) and the
/// process environment, then validate it.
pub fn load_config(config_file: Option<&str>) -> Result<(SyncConfig, Option<PathBuf>), String> {
    let mut cfg = SyncConfig::default();

    let explicit = config_file
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);

    let (path_to_try, required) = match explicit {
        Some(path) => (Some(path), true),
        None => (default_config_path(), false),
    };

    let mut used = None;
    if let Some(path) = path_to_try {
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                apply_yaml(&mut cfg, &text)?;
                used = Some(path);
            }
            Err(err) => {
                if required {
                    return Err(format!("failed to load config file: {err}"));
                }
            }
        }
    }

    apply_env_with(&mut cfg, |key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok((cfg, used))
}

/// Overlay YAML text onto `cfg`. Unset or zero fields keep their values.
pub fn apply_yaml(cfg: &mut SyncConfig, text: &str) -> Result<(), String> {
    let partial: PartialConfig =
        serde_yaml::from_str(text).map_err(|err| format!("parse config: {err}"))?;
    apply_partial(cfg, partial)
}

fn apply_partial(cfg: &mut SyncConfig, partial: PartialConfig) -> Result<(), String> {
    if partial.debounce_ms > 0 {
        cfg.debounce = Duration::from_millis(partial.debounce_ms);
    }
    if partial.status_clear_ms > 0 {
        cfg.status_clear = Duration::from_millis(partial.status_clear_ms);
    }
    if partial.default_rows > 0 {
        cfg.default_extent.max_rows = partial.default_rows;
    }
    if partial.default_cols > 0 {
        cfg.default_extent.max_cols = partial.default_cols;
    }
    if !partial.default_sheet_name.trim().is_empty() {
        cfg.default_sheet_name = partial.default_sheet_name.trim().to_string();
    }
    if !partial.checklist_labels.is_empty() {
        cfg.checklist_labels = partial
            .checklist_labels
            .into_iter()
            .map(|label| label.trim().to_string())
            .collect();
    }
    if !partial.database_path.trim().is_empty() {
        cfg.database_path = Some(expand_tilde(partial.database_path.trim())?);
    }
    Ok(())
}

/// Apply `GRIDSYNC_*` overrides read through `lookup`.
pub fn apply_env_with(
    cfg: &mut SyncConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), String> {
    if let Some(raw) = lookup("GRIDSYNC_DEBOUNCE_MS") {
        cfg.debounce = Duration::from_millis(parse_ms("GRIDSYNC_DEBOUNCE_MS", &raw)?);
    }
    if let Some(raw) = lookup("GRIDSYNC_STATUS_CLEAR_MS") {
        cfg.status_clear = Duration::from_millis(parse_ms("GRIDSYNC_STATUS_CLEAR_MS", &raw)?);
    }
    if let Some(raw) = lookup("GRIDSYNC_DATABASE_PATH") {
        if !raw.trim().is_empty() {
            cfg.database_path = Some(expand_tilde(raw.trim())?);
        }
    }
    Ok(())
}

fn parse_ms(key: &str, raw: &str) -> Result<u64, String> {
    raw.trim()
        .parse::<u64>()
        .map_err(|err| format!("{key}: invalid milliseconds {raw:?}: {err}"))
}

fn default_config_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return Some(PathBuf::from(xdg).join("gridsync").join("config.yaml"));
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        if !home.trim().is_empty() {
            return Some(
                PathBuf::from(home)
                    .join(".config")
                    .join("gridsync")
                    .join("config.yaml"),
            );
        }
    }
    None
}

fn expand_tilde(input: &str) -> Result<PathBuf, String> {
    if input == "~" {
        let home = std::env::var("HOME").map_err(|_| "failed to resolve HOME".to_string())?;
        return Ok(PathBuf::from(home));
    }
    if let Some(rest) = input.strip_prefix("~/") {
        let home = std::env::var("HOME").map_err(|_| "failed to resolve HOME".to_string())?;
        return Ok(PathBuf::from(home).join(rest));
    }
    Ok(Path::new(input).to_path_buf())
}
