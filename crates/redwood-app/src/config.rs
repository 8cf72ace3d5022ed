// SPDX-License-Identifier: CEPL-1.0
use std::{fs, path::Path, path::PathBuf};

use clap::ValueEnum;
use redwood_platform::WindowDesc;
use redwood_render_vk::{PresentModePreference, ValidationPolicy, VkConfig};
use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_CONFIG: &str = "redwood.toml";
pub const VALIDATION_ENV: &str = "REDWOOD_VALIDATION";

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let d = WindowDesc::default();
        Self {
            title: d.title,
            width: d.width,
            height: d.height,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present_mode: PresentModeCfg,
    pub validation: ValidationCfg,
    /// Directory of `<name>.spv` files. Unset means embedded shaders when built with them.
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            present_mode: PresentModeCfg::default(),
            validation: ValidationCfg::default(),
            shader_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Mailbox,
    Fifo,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCfg {
    #[default]
    Auto,
    On,
    Off,
}

impl AppCfg {
    pub fn window_desc(&self) -> WindowDesc {
        WindowDesc {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
        }
    }

    pub fn vk_config(&self) -> VkConfig {
        VkConfig {
            validation: match self.render.validation {
                ValidationCfg::Auto => ValidationPolicy::Auto,
                ValidationCfg::On => ValidationPolicy::On,
                ValidationCfg::Off => ValidationPolicy::Off,
            },
            present_mode: match self.render.present_mode {
                PresentModeCfg::Mailbox => PresentModePreference::Mailbox,
                PresentModeCfg::Fifo => PresentModePreference::Fifo,
            },
            clear_color: self.render.clear_color,
        }
    }
}

pub fn parse_cfg(src: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(src)
}

/// Missing file means defaults; a broken one warns and also means defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse_cfg(&s) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("{}: {e}; using defaults", path.display());
                AppCfg::default()
            }
        },
        Err(_) => AppCfg::default(),
    }
}

/// `REDWOOD_VALIDATION=0|1` (also off/on, false/true).
pub fn validation_from_env(value: Option<&str>) -> Option<ValidationCfg> {
    match value?.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" => Some(ValidationCfg::On),
        "0" | "off" | "false" => Some(ValidationCfg::Off),
        other => {
            warn!("ignoring {VALIDATION_ENV}={other:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Mailbox);
        assert_eq!(cfg.render.validation, ValidationCfg::Auto);
        assert!(cfg.render.shader_dir.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [window]
            title = "demo"

            [render]
            present_mode = "fifo"
            validation = "off"
            clear_color = [0.1, 0.2, 0.3, 1.0]
            shader_dir = "build/spv"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "demo");
        assert_eq!(cfg.window.width, 1280);

        let vk = cfg.vk_config();
        assert_eq!(vk.present_mode, PresentModePreference::Fifo);
        assert_eq!(vk.validation, ValidationPolicy::Off);
        assert_eq!(vk.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(cfg.render.shader_dir, Some(PathBuf::from("build/spv")));
    }

    #[test]
    fn unknown_present_mode_is_rejected() {
        assert!(parse_cfg("[render]\npresent_mode = \"immediate\"").is_err());
    }

    #[test]
    fn missing_file_falls_back() {
        let cfg = load_cfg(Path::new("definitely/not/here/redwood.toml"));
        assert_eq!(cfg.window.title, "Redwood");
    }

    #[test]
    fn env_validation_values() {
        assert_eq!(validation_from_env(Some("1")), Some(ValidationCfg::On));
        assert_eq!(validation_from_env(Some("off")), Some(ValidationCfg::Off));
        assert_eq!(validation_from_env(Some("maybe")), None);
        assert_eq!(validation_from_env(None), None);
    }
}
