//! Process-wide configuration, loaded the same way `cognitod::config`
//! loads `/etc/linnix/linnix.toml`: TOML file, overridable by an
//! environment variable, falling back to defaults if missing or
//! unparsable.

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/st2110/st2110.toml";
const ENV_CONFIG_PATH: &str = "ST2110_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CoreConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
}

impl CoreConfig {
    pub fn load() -> Self {
        let path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&PathBuf::from(path))
    }

    pub fn load_from(path: &PathBuf) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => CoreConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_sleep_us")]
    pub default_sleep_us: u64,
    #[serde(default)]
    pub force_sleep_us: u64,
    #[serde(default = "default_zero_sleep_thresh_us")]
    pub zero_sleep_thresh_us: u64,
    #[serde(default)]
    pub tasklet_time_measure: bool,
    #[serde(default = "default_bulk")]
    pub bulk: u16,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_sleep_us: default_sleep_us(),
            force_sleep_us: 0,
            zero_sleep_thresh_us: default_zero_sleep_thresh_us(),
            tasklet_time_measure: false,
            bulk: default_bulk(),
        }
    }
}

fn default_sleep_us() -> u64 {
    1_000
}
fn default_zero_sleep_thresh_us() -> u64 {
    200
}
fn default_bulk() -> u16 {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct PacingConfig {
    #[serde(default = "default_vrx_narrow_floor")]
    pub vrx_narrow_floor: u32,
    #[serde(default = "default_vrx_wide_floor")]
    pub vrx_wide_floor: u32,
    #[serde(default = "default_training_frames")]
    pub training_frames: u32,
    #[serde(default = "default_training_trim")]
    pub training_trim_samples: u32,
    #[serde(default = "default_pad_interval_floor")]
    pub pad_interval_floor: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            vrx_narrow_floor: default_vrx_narrow_floor(),
            vrx_wide_floor: default_vrx_wide_floor(),
            training_frames: default_training_frames(),
            training_trim_samples: default_training_trim(),
            pad_interval_floor: default_pad_interval_floor(),
        }
    }
}

fn default_vrx_narrow_floor() -> u32 {
    8
}
fn default_vrx_wide_floor() -> u32 {
    720
}
fn default_training_frames() -> u32 {
    66
}
fn default_training_trim() -> u32 {
    60
}
fn default_pad_interval_floor() -> f64 {
    32.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ManagerConfig {
    #[serde(default = "default_video_slots")]
    pub tx_video_slots_per_scheduler: usize,
    #[serde(default = "default_audio_slots")]
    pub tx_audio_slots_global: usize,
    #[serde(default = "default_anc_slots")]
    pub tx_anc_slots_global: usize,
    #[serde(default = "default_fastmeta_slots")]
    pub tx_fastmeta_slots_global: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tx_video_slots_per_scheduler: default_video_slots(),
            tx_audio_slots_global: default_audio_slots(),
            tx_anc_slots_global: default_anc_slots(),
            tx_fastmeta_slots_global: default_fastmeta_slots(),
        }
    }
}

fn default_video_slots() -> usize {
    60
}
fn default_audio_slots() -> usize {
    180
}
fn default_anc_slots() -> usize {
    180
}
fn default_fastmeta_slots() -> usize {
    180
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = CoreConfig::load_from(&PathBuf::from("/nonexistent/path/st2110.toml"));
        assert_eq!(cfg.scheduler.default_sleep_us, 1_000);
        assert_eq!(cfg.manager.tx_video_slots_per_scheduler, 60);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("st2110.toml");
        std::fs::write(&path, "[scheduler]\ndefault_sleep_us = 500\n").unwrap();
        let cfg = CoreConfig::load_from(&path);
        assert_eq!(cfg.scheduler.default_sleep_us, 500);
        assert_eq!(cfg.scheduler.bulk, 4);
    }
}
