//! Configuration sections for the game and renderer

use serde::{Serialize, Deserialize};
use super::{Config, ConfigError};

/// Window creation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in pixels
    pub width: u32,
    /// Initial height in pixels
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Pink Pearl".to_string(),
            width: 1152,
            height: 720,
        }
    }
}

/// Vulkan renderer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Frames the CPU may record ahead of the GPU
    pub max_frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers, `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Upper bound for any CPU wait on the GPU, in milliseconds
    pub gpu_timeout_ms: u64,
    /// Directory holding the compiled SPIR-V modules
    pub shader_dir: String,
    /// Clear color of the swapchain image
    pub clear_color: [f32; 4],
}

impl RendererConfig {
    /// Resolve the validation setting against the build type
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Pink Pearl".to_string(),
            max_frames_in_flight: 2,
            enable_validation: None,
            gpu_timeout_ms: 5000,
            shader_dir: "target/shaders".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Capacities of the render-object pools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Opaque sprite and room quads
    pub main_capacity: usize,
    /// Debug wireframe quads
    pub debug_capacity: usize,
    /// Screen-space quads
    pub gui_capacity: usize,
    /// Live render objects across all pools
    pub render_object_capacity: usize,
}

impl PoolConfig {
    /// Total model slots across all pools
    pub const fn total_models(&self) -> usize {
        self.main_capacity + self.debug_capacity + self.gui_capacity
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            main_capacity: 256,
            debug_capacity: 64,
            gui_capacity: 64,
            render_object_capacity: 256,
        }
    }
}

/// Room caching and scrolling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    /// Rooms that can have a composited texture resident at once
    pub cache_slots: usize,
    /// Duration of a scroll between rooms
    pub transition_ms: u64,
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self {
            cache_slots: 2,
            transition_ms: 1024,
        }
    }
}

/// Game loop and asset locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Simulation ticks per second
    pub tick_rate_hz: u32,
    /// Directory containing the asset files and texture images
    pub asset_dir: String,
    /// Texture pack file name inside `asset_dir`
    pub texture_pack: String,
    /// Area file name inside `asset_dir`
    pub area_file: String,
    /// Entity record file name inside `asset_dir`
    pub entity_file: String,
    /// Room the player starts in
    pub start_room: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20,
            asset_dir: "assets".to_string(),
            texture_pack: "textures.fgt".to_string(),
            area_file: "overworld.fga".to_string(),
            entity_file: "entities.fge".to_string(),
            start_room: 0,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PearlConfig {
    /// Fallback log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Window settings
    pub window: WindowConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
    /// Pool capacities
    pub pools: PoolConfig,
    /// Room cache settings
    pub area: AreaConfig,
    /// Game loop settings
    pub game: GameConfig,
}

impl Default for PearlConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            window: WindowConfig::default(),
            renderer: RendererConfig::default(),
            pools: PoolConfig::default(),
            area: AreaConfig::default(),
            game: GameConfig::default(),
        }
    }
}

impl PearlConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let renderer = &self.renderer;
        if renderer.application_name.is_empty() {
            return Err(invalid("renderer.application_name", "cannot be empty"));
        }
        if !(1..=8).contains(&renderer.max_frames_in_flight) {
            return Err(invalid("renderer.max_frames_in_flight", "must be between 1 and 8"));
        }
        if renderer.gpu_timeout_ms == 0 {
            return Err(invalid("renderer.gpu_timeout_ms", "must be positive"));
        }
        if self.area.cache_slots < 2 {
            return Err(invalid("area.cache_slots", "at least two slots are needed to scroll"));
        }
        if self.area.transition_ms == 0 {
            return Err(invalid("area.transition_ms", "must be positive"));
        }
        if self.pools.main_capacity == 0 || self.pools.render_object_capacity == 0 {
            return Err(invalid("pools", "main and render object capacities must be positive"));
        }
        if self.game.tick_rate_hz == 0 {
            return Err(invalid("game.tick_rate_hz", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.to_string() }
}

impl Config for PearlConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PearlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.area.cache_slots, 2);
        assert_eq!(config.area.transition_ms, 1024);
        assert_eq!(config.game.tick_rate_hz, 20);
        assert_eq!(config.renderer.max_frames_in_flight, 2);
    }

    #[test]
    fn test_single_cache_slot_rejected() {
        let mut config = PearlConfig::default();
        config.area.cache_slots = 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "area.cache_slots", .. })
        ));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: PearlConfig = toml::from_str("[area]\ncache_slots = 3\n").unwrap();
        assert_eq!(config.area.cache_slots, 3);
        assert_eq!(config.area.transition_ms, 1024);
        assert_eq!(config.window.title, "Pink Pearl");
    }

    #[test]
    fn test_ron_roundtrip_preserves_pools() {
        let mut config = PearlConfig::default();
        config.pools.debug_capacity = 12;
        let text = ron::ser::to_string(&config).unwrap();
        let parsed: PearlConfig = ron::from_str(&text).unwrap();
        assert_eq!(parsed.pools.debug_capacity, 12);
    }
}
