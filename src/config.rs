// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Every field is optional; the defaults draw the textured quad in a
// 1200x400 window.

use crate::scene::Scene;
use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "vulkan-learning".to_string(),
            width: 1200,
            height: 400,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub scene: Scene,
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    /// Viewport and scissor set per frame instead of baked into the pipeline
    pub dynamic_viewport: bool,
    pub fence_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            scene: Scene::default(),
            present_mode: "mailbox".to_string(),
            clear_color: [1.0, 0.8, 0.4, 0.0],
            frames_in_flight: 3,
            dynamic_viewport: true,
            fence_timeout_ms: 1000,
            acquire_timeout_ms: 1000,
        }
    }
}

/// Asset locations, relative to the working directory
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub shader_dir: PathBuf,
    pub texture: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            texture: PathBuf::from("assets/vulkan-logo.png"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
    pub fps_sample_frames: u32,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: true,
            fps_sample_frames: 360,
        }
    }
}

impl Config {
    /// Load configuration from a specific path, `None` if there is no file.
    ///
    /// Runs before the logger exists, so nothing is logged here.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(Some(config))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Number of frame slots; at least one.
    pub fn frames_in_flight(&self) -> usize {
        self.graphics.frames_in_flight.max(1)
    }

    /// Validation is only ever enabled in debug builds.
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.graphics.fence_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.graphics.acquire_timeout_ms)
    }

    /// Compiled SPIR-V for the configured scene, `None` when it draws nothing.
    pub fn shader_paths(&self) -> Option<(PathBuf, PathBuf)> {
        let stem = self.graphics.scene.shader_stem()?;
        let dir = &self.assets.shader_dir;
        Some((
            dir.join(format!("{stem}.vert.spv")),
            dir.join(format!("{stem}.frag.spv")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.title, "vulkan-learning");
        assert_eq!((config.window.width, config.window.height), (1200, 400));
        assert_eq!(config.graphics.scene, Scene::TexturedQuad);
        assert_eq!(config.graphics.clear_color, [1.0, 0.8, 0.4, 0.0]);
        assert_eq!(config.frames_in_flight(), 3);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.fence_timeout(), Duration::from_secs(1));
        assert_eq!(config.debug.fps_sample_frames, 360);
        assert!(config.graphics.dynamic_viewport);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            scene = "triangle"
            present_mode = "FIFO"

            [window]
            width = 640
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.scene, Scene::Triangle);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 400);
        assert_eq!(config.graphics.acquire_timeout_ms, 1000);
    }

    #[test]
    fn zero_frames_in_flight_is_raised_to_one() {
        let config = Config::from_toml_str("[graphics]\nframes_in_flight = 0").unwrap();
        assert_eq!(config.frames_in_flight(), 1);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let config = Config::from_toml_str("[graphics]\npresent_mode = \"vsync\"").unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn unknown_scene_is_a_parse_error() {
        assert!(Config::from_toml_str("[graphics]\nscene = \"cube\"").is_err());
    }

    #[test]
    fn shader_paths_follow_the_scene() {
        let mut config = Config::default();
        let (vert, frag) = config.shader_paths().unwrap();
        assert_eq!(vert, Path::new("shaders").join("quad.vert.spv"));
        assert_eq!(frag, Path::new("shaders").join("quad.frag.spv"));

        config.graphics.scene = Scene::Clear;
        assert!(config.shader_paths().is_none());
    }

    #[test]
    fn missing_file_is_reported_to_the_caller() {
        assert!(Config::load_from_path("does-not-exist/config.toml").unwrap().is_none());
    }

    #[test]
    fn shipped_config_file_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.toml");
        let config = Config::load_from_path(path).unwrap().unwrap();
        assert!(config.frames_in_flight() >= 1);
    }
}
