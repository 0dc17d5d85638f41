//! Texture registry and per-quad animation state
//!
//! Every texture is a 2D array image in which atlas cell `k` lives in array
//! layer `k`. An animation names a run of consecutive cells; the image index
//! a quad samples is `start_cell + frame`.

use std::collections::HashMap;

use bitflags::bitflags;

use super::PoolError;

/// Id of the placeholder texture that stands in for unknown ids
pub const MISSING_TEXTURE_ID: &str = "missing";

/// Id of the shared atlas holding composited room images
pub const ROOM_ATLAS_TEXTURE_ID: &str = "room_atlas";

bitflags! {
    /// Per-texture flags stored in texture packs
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u32 {
        /// Upload as soon as the pack is loaded instead of on first use
        const PRE_LOADED = 1 << 0;
        /// Source of tile cells for room stitching
        const TILEMAP = 1 << 1;
    }
}

/// A run of consecutive atlas cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Animation {
    /// First cell of the run
    pub start_cell: u32,
    /// Number of frames, at least one
    pub frame_count: u32,
    /// Playback rate; zero holds the first frame
    pub fps: u32,
}

impl Animation {
    /// Single still frame
    pub const STILL: Self = Self { start_cell: 0, frame_count: 1, fps: 0 };
}

/// Layout and animations of one texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInfo {
    /// Unique id, also the image file stem
    pub id: String,
    /// Pack flags
    pub flags: TextureFlags,
    /// Cells per row and column of the source image
    pub cell_grid: [u32; 2],
    /// Pixel extent of one cell
    pub cell_extent: [u32; 2],
    /// Animations, never empty
    pub animations: Vec<Animation>,
}

impl TextureInfo {
    /// Number of cells, which is the array layer count of the GPU image
    pub const fn cell_count(&self) -> u32 {
        self.cell_grid[0] * self.cell_grid[1]
    }

    /// Magenta/black checkerboard shown for unknown textures
    pub fn missing() -> Self {
        Self {
            id: MISSING_TEXTURE_ID.to_string(),
            flags: TextureFlags::PRE_LOADED,
            cell_grid: [1, 1],
            cell_extent: [16, 16],
            animations: vec![Animation::STILL],
        }
    }

    /// Room atlas with one still animation per array layer
    pub fn room_atlas(layers: u32, cell_extent: [u32; 2]) -> Self {
        Self {
            id: ROOM_ATLAS_TEXTURE_ID.to_string(),
            flags: TextureFlags::PRE_LOADED,
            cell_grid: [layers, 1],
            cell_extent,
            animations: (0..layers)
                .map(|layer| Animation { start_cell: layer, frame_count: 1, fps: 0 })
                .collect(),
        }
    }
}

/// Index of a texture in the registry, matching its GPU descriptor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub usize);

impl TextureId {
    /// The placeholder texture
    pub const MISSING: Self = Self(0);
}

/// All textures known to the renderer, by id
pub struct TextureRegistry {
    textures: Vec<TextureInfo>,
    by_name: HashMap<String, TextureId>,
}

impl Default for TextureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureRegistry {
    /// Create a registry holding only the placeholder texture
    pub fn new() -> Self {
        let mut registry = Self { textures: Vec::new(), by_name: HashMap::new() };
        registry.register(TextureInfo::missing());
        registry
    }

    /// Add a texture, replacing the layout of an existing one with the same id
    pub fn register(&mut self, mut info: TextureInfo) -> TextureId {
        if info.animations.is_empty() {
            info.animations.push(Animation::STILL);
        }
        if let Some(&id) = self.by_name.get(&info.id) {
            log::debug!("Replacing texture '{}'", info.id);
            self.textures[id.0] = info;
            return id;
        }
        let id = TextureId(self.textures.len());
        self.by_name.insert(info.id.clone(), id);
        self.textures.push(info);
        id
    }

    /// Exact lookup
    pub fn find(&self, name: &str) -> Option<TextureId> {
        self.by_name.get(name).copied()
    }

    /// Lookup that resolves unknown ids to the placeholder
    pub fn resolve(&self, name: &str) -> TextureId {
        self.find(name).unwrap_or_else(|| {
            log::warn!("Texture '{}' not found, using placeholder", name);
            TextureId::MISSING
        })
    }

    /// Texture layout by index
    pub fn get(&self, id: TextureId) -> Option<&TextureInfo> {
        self.textures.get(id.0)
    }

    /// Number of registered textures
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// Whether no texture is registered
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Iterate textures in index order
    pub fn iter(&self) -> impl Iterator<Item = (TextureId, &TextureInfo)> {
        self.textures.iter().enumerate().map(|(i, info)| (TextureId(i), info))
    }
}

/// Animation playback state of one quad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureState {
    /// Texture the quad samples
    pub texture: TextureId,
    /// Selected animation index
    pub animation: usize,
    /// Frame within the animation
    pub frame: u32,
    /// Time the current frame started
    pub last_frame_ms: u64,
    clip: Animation,
}

impl TextureState {
    /// Start an animation of `texture` at its first frame
    pub fn new(texture: TextureId, info: &TextureInfo, animation: usize, now_ms: u64) -> Result<Self, PoolError> {
        let clip = *info
            .animations
            .get(animation)
            .ok_or(PoolError::InvalidAnimation { animation, available: info.animations.len() })?;
        Ok(Self { texture, animation, frame: 0, last_frame_ms: now_ms, clip })
    }

    /// Switch to another animation of the same texture, restarting playback
    pub fn set_animation(&mut self, info: &TextureInfo, animation: usize, now_ms: u64) -> Result<(), PoolError> {
        *self = Self::new(self.texture, info, animation, now_ms)?;
        Ok(())
    }

    /// Array layer currently sampled
    pub const fn image_index(&self) -> u32 {
        self.clip.start_cell + self.frame
    }

    /// Step frames by elapsed time; returns whether the image index changed
    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&mut self, now_ms: u64) -> bool {
        if self.clip.fps == 0 || self.clip.frame_count <= 1 {
            return false;
        }
        let frame_ms = 1000 / u64::from(self.clip.fps).max(1);
        let elapsed = now_ms.saturating_sub(self.last_frame_ms);
        let steps = elapsed / frame_ms.max(1);
        if steps == 0 {
            return false;
        }
        let before = self.frame;
        self.frame = ((u64::from(self.frame) + steps) % u64::from(self.clip.frame_count)) as u32;
        self.last_frame_ms += steps * frame_ms.max(1);
        self.frame != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk_texture() -> TextureInfo {
        TextureInfo {
            id: "player".to_string(),
            flags: TextureFlags::empty(),
            cell_grid: [4, 2],
            cell_extent: [16, 16],
            animations: vec![
                Animation { start_cell: 0, frame_count: 4, fps: 10 },
                Animation { start_cell: 4, frame_count: 1, fps: 0 },
            ],
        }
    }

    #[test]
    fn test_missing_texture_is_index_zero() {
        let mut registry = TextureRegistry::new();
        let player = registry.register(walk_texture());
        assert_eq!(registry.find(MISSING_TEXTURE_ID), Some(TextureId::MISSING));
        assert_eq!(player, TextureId(1));
        assert_eq!(registry.resolve("nope"), TextureId::MISSING);
        assert_eq!(registry.resolve("player"), player);
    }

    #[test]
    fn test_register_replaces_by_id() {
        let mut registry = TextureRegistry::new();
        let first = registry.register(walk_texture());
        let mut updated = walk_texture();
        updated.animations.clear();
        let second = registry.register(updated);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(second).unwrap().animations, vec![Animation::STILL]);
    }

    #[test]
    fn test_animation_advances_and_wraps() {
        let info = walk_texture();
        let mut state = TextureState::new(TextureId(1), &info, 0, 1000).unwrap();
        assert!(!state.advance(1050));
        assert!(state.advance(1100));
        assert_eq!(state.image_index(), 1);
        assert!(state.advance(1400));
        assert_eq!(state.frame, 0);
        assert_eq!(state.last_frame_ms, 1400);
    }

    #[test]
    fn test_still_animation_never_advances() {
        let info = walk_texture();
        let mut state = TextureState::new(TextureId(1), &info, 1, 0).unwrap();
        assert!(!state.advance(10_000));
        assert_eq!(state.image_index(), 4);
    }

    #[test]
    fn test_invalid_animation_rejected() {
        let info = walk_texture();
        let mut state = TextureState::new(TextureId(1), &info, 0, 0).unwrap();
        assert!(state.set_animation(&info, 5, 0).is_err());
        assert_eq!(state.animation, 0);
    }

    #[test]
    fn test_room_atlas_animation_matches_layer() {
        let atlas = TextureInfo::room_atlas(4, [640, 400]);
        assert_eq!(atlas.cell_count(), 4);
        for (index, anim) in atlas.animations.iter().enumerate() {
            assert_eq!(anim.start_cell as usize, index);
        }
    }
}
