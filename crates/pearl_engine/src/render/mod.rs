//! Rendering core
//!
//! The CPU-side state ([`TextureRegistry`], [`ModelPool`], [`RenderObjects`])
//! works without a GPU; [`RenderManager`] mirrors it onto Vulkan through
//! [`backends::vulkan`].

pub mod texture_registry;
pub mod model_pool;
pub mod objects;
pub mod manager;
pub mod backends;

pub use texture_registry::{Animation, TextureFlags, TextureId, TextureInfo, TextureRegistry, TextureState};
pub use model_pool::{DrawInfo, ModelPool, ModelTransform, PoolUpload, QuadDesc, Transform, Vertex};
pub use objects::{QuadLoadInfo, RenderObjectHandle, RenderObjectLoadInfo, RenderObjects};
pub use manager::RenderManager;

use thiserror::Error;

use crate::assets::AssetError;
use backends::vulkan::VulkanError;

/// The typed model pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Textured quads drawn with the camera
    Main = 0,
    /// Wireframe quads drawn with the camera
    Debug = 1,
    /// Textured quads drawn in screen space
    Gui = 2,
}

impl PoolKind {
    /// Every pool in draw order
    pub const ALL: [Self; 3] = [Self::Main, Self::Debug, Self::Gui];

    /// Position in [`Self::ALL`]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Model pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every slot is in use
    #[error("{kind:?} pool exhausted ({capacity} slots)")]
    PoolExhausted {
        /// Pool that was full
        kind: PoolKind,
        /// Its capacity
        capacity: usize,
    },

    /// Model index out of range or not loaded
    #[error("Invalid model {model} (capacity {capacity})")]
    InvalidModel {
        /// Requested model
        model: usize,
        /// Pool capacity
        capacity: usize,
    },

    /// Animation index out of range for the texture
    #[error("Invalid animation {animation} ({available} available)")]
    InvalidAnimation {
        /// Requested animation
        animation: usize,
        /// Animations the texture has
        available: usize,
    },
}

/// Rendering errors
#[derive(Error, Debug)]
pub enum RenderError {
    /// Vulkan backend failure
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// Model pool failure
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Handle is stale or was never issued
    #[error("Invalid render object handle")]
    InvalidHandle,

    /// The render object table is full
    #[error("Render object table exhausted ({0} objects)")]
    ObjectsExhausted(usize),

    /// Texture id is not registered
    #[error("Texture not found: {0}")]
    TextureNotFound(String),

    /// Asset loading failure
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// Room composition did not complete
    #[error("Room stitch failed: {0}")]
    StitchFailed(String),
}

impl RenderError {
    /// Whether rendering cannot continue; anything else costs at most a
    /// degraded frame or room
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Vulkan(e) => e.is_device_failure(),
            Self::Pool(_)
            | Self::InvalidHandle
            | Self::ObjectsExhausted(_)
            | Self::TextureNotFound(_)
            | Self::Asset(_)
            | Self::StitchFailed(_) => false,
        }
    }
}

/// Visible world rectangle, relative to the camera position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionBounds {
    /// Left edge
    pub left: f32,
    /// Right edge
    pub right: f32,
    /// Top edge
    pub top: f32,
    /// Bottom edge
    pub bottom: f32,
}

impl ProjectionBounds {
    /// Bounds covering `width × height` world units from the camera origin
    pub const fn from_extent(width: f32, height: f32) -> Self {
        Self { left: 0.0, right: width, top: 0.0, bottom: height }
    }
}
