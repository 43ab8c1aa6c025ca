//! Runtime configuration.
//!
//! The default is render-per-action: every processed action (or props
//! change) is followed by exactly one render pass. Each [`RuntimeOption`] is
//! an independent optimization layered on top of that contract.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const OPTIONS_ENV_VAR: &str = "WORKFLOW_RUNTIME_OPTIONS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown runtime option: {0}")]
    UnknownOption(String),
    #[error("Invalid runtime config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeOption {
    /// Skip the render pass when no action in the step changed state.
    RenderOnlyWhenStateChanges,
    /// Reuse cached renderings of nodes whose subtree is clean.
    PartialTreeRendering,
    /// Drain queued actions before rendering again.
    ConflateStaleRenderings,
    StableEventHandlers,
    DrainExclusiveActions,
}

impl RuntimeOption {
    pub const ALL: [RuntimeOption; 5] = [
        RuntimeOption::RenderOnlyWhenStateChanges,
        RuntimeOption::PartialTreeRendering,
        RuntimeOption::ConflateStaleRenderings,
        RuntimeOption::StableEventHandlers,
        RuntimeOption::DrainExclusiveActions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeOption::RenderOnlyWhenStateChanges => "render-only-when-state-changes",
            RuntimeOption::PartialTreeRendering => "partial-tree-rendering",
            RuntimeOption::ConflateStaleRenderings => "conflate-stale-renderings",
            RuntimeOption::StableEventHandlers => "stable-event-handlers",
            RuntimeOption::DrainExclusiveActions => "drain-exclusive-actions",
        }
    }
}

impl FromStr for RuntimeOption {
    type Err = ConfigError;

    /// Accepts kebab, snake or screaming case.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        RuntimeOption::ALL
            .into_iter()
            .find(|option| option.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownOption(raw.trim().to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub options: BTreeSet<RuntimeOption>,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_per_action() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            options: RuntimeOption::ALL.into_iter().collect(),
        }
    }

    pub fn with_option(mut self, option: RuntimeOption) -> Self {
        self.options.insert(option);
        self
    }

    pub fn without_option(mut self, option: RuntimeOption) -> Self {
        self.options.remove(&option);
        self
    }

    pub fn has(&self, option: RuntimeOption) -> bool {
        self.options.contains(&option)
    }

    pub fn conflate_stale_renderings(&self) -> bool {
        self.has(RuntimeOption::ConflateStaleRenderings)
            || self.has(RuntimeOption::DrainExclusiveActions)
    }

    pub fn render_only_when_state_changes(&self) -> bool {
        self.has(RuntimeOption::RenderOnlyWhenStateChanges)
    }

    pub fn partial_tree_rendering(&self) -> bool {
        self.has(RuntimeOption::PartialTreeRendering)
    }

    /// Parse a comma separated option list such as
    /// `"conflate-stale-renderings, partial_tree_rendering"`.
    pub fn from_options_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
            config.options.insert(part.parse()?);
        }
        Ok(config)
    }

    /// ```toml
    /// options = ["conflate-stale-renderings", "partial-tree-rendering"]
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Read `WORKFLOW_RUNTIME_OPTIONS`. Unknown names are logged and ignored.
    pub fn from_env() -> Self {
        let raw = std::env::var(OPTIONS_ENV_VAR).unwrap_or_default();
        let mut config = Self::default();
        for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
            match part.parse() {
                Ok(option) => {
                    config.options.insert(option);
                }
                Err(e) => tracing::warn!("Ignoring {} entry: {}", OPTIONS_ENV_VAR, e),
            }
        }
        config
    }
}
