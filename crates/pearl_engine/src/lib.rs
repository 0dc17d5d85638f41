//! # Pearl Engine
//!
//! Rendering core of Pink Pearl, a 2D tile-based action game, on Vulkan.
//!
//! ## Features
//!
//! - **Room scrolling**: Areas made of grid-connected rooms, with a small
//!   fixed set of GPU cache slots holding composited room images
//! - **Tile stitching**: compute-shader composition of tile layers into a room texture
//! - **Render object pools**: stable handles, paint-ordered indirect draws
//! - **Frame orchestration**: two frames in flight across graphics, compute,
//!   transfer and present queues synchronized with timeline semaphores
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pearl_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PearlConfig::default();
//!     let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
//!     let mut renderer = RenderManager::new(&mut window, &config)?;
//!     renderer.load_texture_pack(std::path::Path::new("assets/textures.fgt"))?;
//!     let bytes = std::fs::read("assets/overworld.fga")?;
//!     let mut area = Area::from_data(read_area_data(&bytes)?, config.area.cache_slots, config.area.transition_ms);
//!     renderer.load_area(&mut area, config.game.start_room)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod assets;
pub mod area;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, PearlConfig},
        foundation::{
            math::{Vec2, Vec3, Vec4, Mat4},
            time::{FixedTimestep, Stopwatch, Timer},
        },
        assets::{read_area_data, read_texture_pack, read_entity_records, AssetError},
        area::{Area, AreaError, Direction, Room, RoomSize, TransitionOutcome},
        render::{
            RenderError, RenderManager, RenderObjectHandle, RenderObjectLoadInfo,
            QuadLoadInfo, PoolKind, ProjectionBounds,
            backends::vulkan::{FrameStatus, Key, Window},
        },
    };
}
