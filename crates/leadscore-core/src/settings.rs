//! Engine settings and where they come from.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::EngineOptions;
use crate::expr::EvalLimits;
use crate::model::SelectionMode;

/// Top-level leadscore settings (`leadscore.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Overrides the tenant's selection mode when set.
    #[serde(default)]
    pub selection_mode: Option<SelectionMode>,
    /// Step budget per expression evaluation.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Maximum expression nesting depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Largest exponent magnitude accepted by `**`.
    #[serde(default = "default_max_exponent")]
    pub max_exponent: f64,
    /// Reject submissions that leave a question unanswered.
    #[serde(default)]
    pub require_all_answers: bool,
    /// Reject answers for fields no question defines.
    #[serde(default)]
    pub reject_unknown_fields: bool,
    /// Max concurrent leads in batch scoring.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Output directory for batch reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_max_steps() -> usize {
    EvalLimits::default().max_steps
}
fn default_max_depth() -> usize {
    EvalLimits::default().max_depth
}
fn default_max_exponent() -> f64 {
    EvalLimits::default().max_exponent
}
fn default_parallelism() -> usize {
    4
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./leadscore-results")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selection_mode: None,
            max_steps: default_max_steps(),
            max_depth: default_max_depth(),
            max_exponent: default_max_exponent(),
            require_all_answers: false,
            reject_unknown_fields: false,
            parallelism: default_parallelism(),
            output_dir: default_output_dir(),
        }
    }
}

impl Settings {
    pub fn limits(&self) -> EvalLimits {
        EvalLimits {
            max_steps: self.max_steps,
            max_depth: self.max_depth,
            max_exponent: self.max_exponent,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            limits: self.limits(),
            selection_mode: self.selection_mode,
            require_all_answers: self.require_all_answers,
            reject_unknown_fields: self.reject_unknown_fields,
        }
    }

    /// Apply `LEADSCORE_*` overrides using `lookup` to read variables.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(mode) = lookup("LEADSCORE_SELECTION_MODE") {
            self.selection_mode = Some(
                mode.parse()
                    .map_err(|e: String| anyhow::anyhow!("LEADSCORE_SELECTION_MODE: {e}"))?,
            );
        }
        if let Some(steps) = lookup("LEADSCORE_MAX_STEPS") {
            self.max_steps = steps
                .trim()
                .parse()
                .with_context(|| format!("LEADSCORE_MAX_STEPS: invalid value '{steps}'"))?;
        }
        if let Some(depth) = lookup("LEADSCORE_MAX_DEPTH") {
            self.max_depth = depth
                .trim()
                .parse()
                .with_context(|| format!("LEADSCORE_MAX_DEPTH: invalid value '{depth}'"))?;
        }
        if let Some(parallelism) = lookup("LEADSCORE_PARALLELISM") {
            self.parallelism = parallelism.trim().parse().with_context(|| {
                format!("LEADSCORE_PARALLELISM: invalid value '{parallelism}'")
            })?;
        }
        self.parallelism = self.parallelism.max(1);
        self.output_dir = PathBuf::from(resolve_env_vars(&self.output_dir.to_string_lossy(), &lookup));
        Ok(())
    }
}

/// Replace `${VAR_NAME}` references using `lookup`; unset variables become
/// empty.
fn resolve_env_vars(s: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let value = lookup(&result[start + 2..start + end]).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
    }
    result
}

/// Load settings from well-known paths.
///
/// Search order:
/// 1. `leadscore.toml` in the current directory
/// 2. `~/.config/leadscore/config.toml`
///
/// Environment overrides: `LEADSCORE_SELECTION_MODE`, `LEADSCORE_MAX_STEPS`,
/// `LEADSCORE_MAX_DEPTH`, `LEADSCORE_PARALLELISM`.
pub fn load_settings() -> Result<Settings> {
    load_settings_from(None)
}

/// Load settings from an explicit path, or search the default locations.
pub fn load_settings_from(path: Option<&Path>) -> Result<Settings> {
    let settings_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("settings file not found: {}", p.display()),
        None => {
            let local = PathBuf::from("leadscore.toml");
            if local.exists() {
                Some(local)
            } else {
                config_dir()
                    .map(|dir| dir.join("config.toml"))
                    .filter(|global| global.exists())
            }
        }
    };

    let mut settings = match settings_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            toml::from_str::<Settings>(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?
        }
        None => Settings::default(),
    };

    settings.apply_overrides(|name| std::env::var(name).ok())?;
    Ok(settings)
}

fn config_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("leadscore"))
}
