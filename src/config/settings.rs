use super::Vocabulary;
use crate::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Engine-wide settings, shared by every execution.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Keyword lists behind the heuristics.
    pub vocabulary: Vocabulary,

    /// Page-settling waits.
    pub stability: StabilitySettings,

    /// Where session videos are finalized.
    pub video_dir: PathBuf,

    /// Where failure screenshots are written.
    pub screenshot_dir: PathBuf,

    /// Read-only store of files available to `upload` steps.
    pub upload_dir: PathBuf,

    /// Attempts given to the AI-assisted fallback.
    pub assist_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            vocabulary: Vocabulary::default(),
            stability: StabilitySettings::default(),
            video_dir: PathBuf::from("artifacts/videos"),
            screenshot_dir: PathBuf::from("artifacts/screenshots"),
            upload_dir: PathBuf::from("uploads"),
            assist_attempts: 3,
        }
    }
}

impl EngineSettings {
    /// Load settings from a YAML file. Missing keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Timings for the stability waiter, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StabilitySettings {
    pub network_idle_ms: u64,
    pub network_timeout_ms: u64,
    pub lenient_network_timeout_ms: u64,
    pub loader_timeout_ms: u64,
    pub lenient_loader_timeout_ms: u64,
    /// Frame count treated as "embedded app mounted".
    pub min_frames: usize,
    pub frame_poll_attempts: u32,
    pub frame_poll_interval_ms: u64,
    pub lenient_pause_ms: u64,
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self {
            network_idle_ms: 500,
            network_timeout_ms: 5000,
            lenient_network_timeout_ms: 2000,
            loader_timeout_ms: 5000,
            lenient_loader_timeout_ms: 1500,
            min_frames: 1,
            frame_poll_attempts: 10,
            frame_poll_interval_ms: 500,
            lenient_pause_ms: 500,
        }
    }
}
