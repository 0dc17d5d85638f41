//! Render objects: stable handles over groups of pooled quads

use slotmap::{new_key_type, SlotMap};

use super::model_pool::{ModelPool, QuadDesc};
use super::texture_registry::{TextureId, TextureRegistry, TextureState, MISSING_TEXTURE_ID};
use super::{PoolKind, RenderError};
use crate::config::PoolConfig;
use crate::foundation::math::{Vec2, Vec3, Vec4};

new_key_type! {
    /// Generation-checked handle to a render object
    pub struct RenderObjectHandle;
}

/// One quad of a render object
#[derive(Debug, Clone, PartialEq)]
pub struct QuadLoadInfo {
    /// Pool the quad lives in
    pub pool: PoolKind,
    /// Offset from the object position; z orders painting
    pub offset: Vec3,
    /// Width and height in world units
    pub dimensions: Vec2,
    /// Portion of the texture layer covered
    pub uv_extent: Vec2,
    /// Texture id, unknown ids fall back to the placeholder
    pub texture: String,
    /// Initial animation
    pub animation: usize,
    /// Tint
    pub color: Vec4,
}

impl QuadLoadInfo {
    /// White, untinted quad in the main pool covering the whole texture layer
    pub fn new(texture: impl Into<String>, dimensions: Vec2) -> Self {
        Self {
            pool: PoolKind::Main,
            offset: Vec3::zeros(),
            dimensions,
            uv_extent: Vec2::new(1.0, 1.0),
            texture: texture.into(),
            animation: 0,
            color: Vec4::new(1.0, 1.0, 1.0, 1.0),
        }
    }

    /// Place the quad in another pool
    #[must_use]
    pub fn in_pool(mut self, pool: PoolKind) -> Self {
        self.pool = pool;
        self
    }

    /// Offset the quad from the object origin
    #[must_use]
    pub fn with_offset(mut self, offset: Vec3) -> Self {
        self.offset = offset;
        self
    }

    /// Start on another animation
    #[must_use]
    pub fn with_animation(mut self, animation: usize) -> Self {
        self.animation = animation;
        self
    }

    /// Sample only part of the texture layer
    #[must_use]
    pub fn with_uv_extent(mut self, uv_extent: Vec2) -> Self {
        self.uv_extent = uv_extent;
        self
    }

    /// Tint the quad
    #[must_use]
    pub fn with_color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }
}

/// Everything needed to create a render object
#[derive(Debug, Clone, PartialEq)]
pub struct RenderObjectLoadInfo {
    /// World position of the object origin
    pub position: Vec3,
    /// Quads, addressed afterwards by their index here
    pub quads: Vec<QuadLoadInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Quad {
    pool: PoolKind,
    model: usize,
    offset: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
struct RenderObject {
    position: Vec3,
    quads: Vec<Option<Quad>>,
}

/// Render objects, the model pools backing them and the textures they use
pub struct RenderObjects {
    textures: TextureRegistry,
    pools: [ModelPool; 3],
    objects: SlotMap<RenderObjectHandle, RenderObject>,
    capacity: usize,
}

impl RenderObjects {
    /// Create pools sized by the configuration
    pub fn new(config: &PoolConfig) -> Self {
        Self::with_capacities(
            [config.main_capacity, config.debug_capacity, config.gui_capacity],
            config.render_object_capacity,
        )
    }

    /// Create pools with explicit capacities, in [`PoolKind::ALL`] order
    pub fn with_capacities(pool_capacities: [usize; 3], object_capacity: usize) -> Self {
        let mut first_model = 0;
        let pools = PoolKind::ALL.map(|kind| {
            let capacity = pool_capacities[kind.index()];
            let pool = ModelPool::new(kind, first_model, capacity);
            first_model += capacity;
            pool
        });
        Self {
            textures: TextureRegistry::new(),
            pools,
            objects: SlotMap::with_capacity_and_key(object_capacity),
            capacity: object_capacity,
        }
    }

    /// Registered textures
    pub const fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    /// Registered textures, for adding more
    pub fn textures_mut(&mut self) -> &mut TextureRegistry {
        &mut self.textures
    }

    /// One model pool
    pub fn pool(&self, kind: PoolKind) -> &ModelPool {
        &self.pools[kind.index()]
    }

    /// Every pool in [`PoolKind::ALL`] order
    pub fn pools(&self) -> &[ModelPool] {
        &self.pools
    }

    /// Every pool, mutably, in [`PoolKind::ALL`] order
    pub fn pools_mut(&mut self) -> &mut [ModelPool] {
        &mut self.pools
    }

    /// Total models across all pools
    pub fn total_models(&self) -> usize {
        self.pools.iter().map(ModelPool::capacity).sum()
    }

    /// Number of live render objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no render object is live
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Whether a handle refers to a live object
    pub fn contains(&self, handle: RenderObjectHandle) -> bool {
        self.objects.contains_key(handle)
    }

    /// Create a render object with all of its quads, or nothing on failure
    pub fn load(&mut self, info: &RenderObjectLoadInfo, now_ms: u64) -> Result<RenderObjectHandle, RenderError> {
        if self.objects.len() >= self.capacity {
            return Err(RenderError::ObjectsExhausted(self.capacity));
        }
        let handle = self.objects.insert(RenderObject { position: info.position, quads: Vec::new() });
        for (index, quad) in info.quads.iter().enumerate() {
            if let Err(e) = self.add_quad(handle, index, quad, now_ms) {
                self.unload(handle)?;
                return Err(e);
            }
        }
        Ok(handle)
    }

    /// Destroy a render object and free its quads
    pub fn unload(&mut self, handle: RenderObjectHandle) -> Result<(), RenderError> {
        let object = self.objects.remove(handle).ok_or(RenderError::InvalidHandle)?;
        for quad in object.quads.into_iter().flatten() {
            self.pools[quad.pool.index()].unload(quad.model)?;
        }
        Ok(())
    }

    /// Load a quad at `index`, replacing any quad already there
    pub fn add_quad(
        &mut self,
        handle: RenderObjectHandle,
        index: usize,
        info: &QuadLoadInfo,
        now_ms: u64,
    ) -> Result<(), RenderError> {
        let position = self.objects.get(handle).ok_or(RenderError::InvalidHandle)?.position;
        self.remove_quad(handle, index)?;

        let texture = self.texture_state(info, now_ms)?;
        let desc = QuadDesc {
            translation: position + info.offset,
            dimensions: info.dimensions,
            uv_extent: info.uv_extent,
            color: info.color,
        };
        let model = self.pools[info.pool.index()].load(&desc, texture)?;

        let object = self.objects.get_mut(handle).ok_or(RenderError::InvalidHandle)?;
        if object.quads.len() <= index {
            object.quads.resize(index + 1, None);
        }
        object.quads[index] = Some(Quad { pool: info.pool, model, offset: info.offset });
        Ok(())
    }

    /// Free the quad at `index`; returns whether one was there
    pub fn remove_quad(&mut self, handle: RenderObjectHandle, index: usize) -> Result<bool, RenderError> {
        let object = self.objects.get_mut(handle).ok_or(RenderError::InvalidHandle)?;
        let Some(quad) = object.quads.get_mut(index).and_then(Option::take) else {
            return Ok(false);
        };
        self.pools[quad.pool.index()].unload(quad.model)?;
        Ok(true)
    }

    /// Number of quad indices, including empty ones
    pub fn quad_count(&self, handle: RenderObjectHandle) -> Result<usize, RenderError> {
        Ok(self.object(handle)?.quads.len())
    }

    /// Pool and local model backing a quad
    pub fn quad_model(&self, handle: RenderObjectHandle, index: usize) -> Result<Option<(PoolKind, usize)>, RenderError> {
        Ok(self
            .object(handle)?
            .quads
            .get(index)
            .copied()
            .flatten()
            .map(|quad| (quad.pool, quad.model)))
    }

    /// Object position
    pub fn position(&self, handle: RenderObjectHandle) -> Result<Vec3, RenderError> {
        Ok(self.object(handle)?.position)
    }

    /// Move an object and all of its quads
    pub fn set_position(&mut self, handle: RenderObjectHandle, position: Vec3) -> Result<(), RenderError> {
        let object = self.objects.get_mut(handle).ok_or(RenderError::InvalidHandle)?;
        object.position = position;
        for quad in object.quads.iter().flatten() {
            self.pools[quad.pool.index()].set_translation(quad.model, position + quad.offset)?;
        }
        Ok(())
    }

    /// Scale every quad of an object
    pub fn set_scale(&mut self, handle: RenderObjectHandle, scale: Vec3) -> Result<(), RenderError> {
        let object = self.objects.get(handle).ok_or(RenderError::InvalidHandle)?;
        for quad in object.quads.iter().flatten() {
            self.pools[quad.pool.index()].set_scaling(quad.model, scale)?;
        }
        Ok(())
    }

    /// Rotate every quad of an object
    pub fn set_rotation(&mut self, handle: RenderObjectHandle, rotation: Vec3) -> Result<(), RenderError> {
        let object = self.objects.get(handle).ok_or(RenderError::InvalidHandle)?;
        for quad in object.quads.iter().flatten() {
            self.pools[quad.pool.index()].set_rotation(quad.model, rotation)?;
        }
        Ok(())
    }

    /// Select the animation of one quad
    pub fn set_animation(
        &mut self,
        handle: RenderObjectHandle,
        quad: usize,
        animation: usize,
        now_ms: u64,
    ) -> Result<(), RenderError> {
        let (pool, model) = self.quad_model(handle, quad)?.ok_or(RenderError::InvalidHandle)?;
        let texture = self.pools[pool.index()]
            .texture_state(model)
            .map(|state| state.texture)
            .ok_or(RenderError::InvalidHandle)?;
        let info = self
            .textures
            .get(texture)
            .ok_or_else(|| RenderError::TextureNotFound(format!("#{}", texture.0)))?;
        self.pools[pool.index()].set_animation(model, info, animation, now_ms)?;
        Ok(())
    }

    /// Current animation of one quad
    pub fn animation(&self, handle: RenderObjectHandle, quad: usize) -> Result<usize, RenderError> {
        let (pool, model) = self.quad_model(handle, quad)?.ok_or(RenderError::InvalidHandle)?;
        self.pools[pool.index()]
            .texture_state(model)
            .map(|state| state.animation)
            .ok_or(RenderError::InvalidHandle)
    }

    /// Step every quad's animation; returns how many image indices changed
    pub fn advance_animations(&mut self, now_ms: u64) -> usize {
        self.pools.iter_mut().map(|pool| pool.advance_animations(now_ms)).sum()
    }

    fn object(&self, handle: RenderObjectHandle) -> Result<&RenderObject, RenderError> {
        self.objects.get(handle).ok_or(RenderError::InvalidHandle)
    }

    fn texture_state(&self, info: &QuadLoadInfo, now_ms: u64) -> Result<TextureState, RenderError> {
        let id = self.textures.resolve(&info.texture);
        let texture = self
            .textures
            .get(id)
            .ok_or_else(|| RenderError::TextureNotFound(info.texture.clone()))?;
        let animation = if id == TextureId::MISSING && info.texture != MISSING_TEXTURE_ID {
            0
        } else {
            info.animation
        };
        Ok(TextureState::new(id, texture, animation, now_ms)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::texture_registry::{Animation, TextureFlags, TextureInfo};
    use crate::render::PoolError;

    fn objects() -> RenderObjects {
        let mut objects = RenderObjects::with_capacities([8, 4, 2], 6);
        objects.textures_mut().register(TextureInfo {
            id: "player".to_string(),
            flags: TextureFlags::empty(),
            cell_grid: [4, 1],
            cell_extent: [16, 16],
            animations: vec![Animation { start_cell: 0, frame_count: 2, fps: 4 }, Animation { start_cell: 2, frame_count: 2, fps: 4 }],
        });
        objects
    }

    fn sprite_with_hitbox() -> RenderObjectLoadInfo {
        RenderObjectLoadInfo {
            position: Vec3::new(4.0, 5.0, 0.0),
            quads: vec![
                QuadLoadInfo::new("player", Vec2::new(1.0, 1.0)),
                QuadLoadInfo::new("missing", Vec2::new(0.5, 0.5))
                    .in_pool(PoolKind::Debug)
                    .with_offset(Vec3::new(0.25, 0.5, 0.0)),
            ],
        }
    }

    #[test]
    fn test_load_spreads_quads_over_pools() {
        let mut objects = objects();
        let handle = objects.load(&sprite_with_hitbox(), 0).unwrap();
        assert_eq!(objects.quad_count(handle).unwrap(), 2);
        assert_eq!(objects.pool(PoolKind::Main).active_count(), 1);
        assert_eq!(objects.pool(PoolKind::Debug).active_count(), 1);
        assert_eq!(objects.pool(PoolKind::Debug).first_model(), 8);
    }

    #[test]
    fn test_set_position_moves_quads_with_offsets() {
        let mut objects = objects();
        let handle = objects.load(&sprite_with_hitbox(), 0).unwrap();
        objects.set_position(handle, Vec3::new(10.0, 2.0, 0.0)).unwrap();
        let (pool, model) = objects.quad_model(handle, 1).unwrap().unwrap();
        let transform = objects.pool(pool).transforms()[model];
        assert_eq!(transform.current.translation, Vec3::new(10.25, 2.5, 0.0));
        assert_eq!(transform.previous.translation, Vec3::new(4.25, 5.5, 0.0));
    }

    #[test]
    fn test_scale_and_rotation_reach_every_quad() {
        let mut objects = objects();
        let handle = objects.load(&sprite_with_hitbox(), 0).unwrap();
        objects.set_scale(handle, Vec3::new(2.0, 2.0, 1.0)).unwrap();
        objects.set_rotation(handle, Vec3::new(0.0, 0.0, 0.5)).unwrap();
        for quad in 0..2 {
            let (pool, model) = objects.quad_model(handle, quad).unwrap().unwrap();
            let transform = objects.pool(pool).transforms()[model];
            assert_eq!(transform.current.scale, Vec3::new(2.0, 2.0, 1.0));
            assert_eq!(transform.previous.scale, Vec3::new(1.0, 1.0, 1.0));
            assert_eq!(transform.current.rotation, Vec3::new(0.0, 0.0, 0.5));
        }
    }

    #[test]
    fn test_stale_handle_rejected() {
        let mut objects = objects();
        let handle = objects.load(&sprite_with_hitbox(), 0).unwrap();
        objects.unload(handle).unwrap();
        assert!(matches!(objects.unload(handle), Err(RenderError::InvalidHandle)));
        let reused = objects.load(&sprite_with_hitbox(), 0).unwrap();
        assert_ne!(handle, reused);
        assert!(matches!(objects.set_position(handle, Vec3::zeros()), Err(RenderError::InvalidHandle)));
    }

    #[test]
    fn test_failed_load_leaves_nothing_behind() {
        let mut objects = objects();
        let mut info = sprite_with_hitbox();
        info.quads[0].animation = 9;
        assert!(matches!(
            objects.load(&info, 0),
            Err(RenderError::Pool(PoolError::InvalidAnimation { .. }))
        ));
        assert!(objects.is_empty());
        assert_eq!(objects.pool(PoolKind::Debug).active_count(), 0);
    }

    #[test]
    fn test_animation_roundtrip() {
        let mut objects = objects();
        let handle = objects.load(&sprite_with_hitbox(), 0).unwrap();
        objects.set_animation(handle, 0, 1, 0).unwrap();
        assert_eq!(objects.animation(handle, 0).unwrap(), 1);
        assert_eq!(objects.pool(PoolKind::Main).draw_infos()[0].image_index, 2);
    }

    #[test]
    fn test_unknown_texture_uses_placeholder() {
        let mut objects = objects();
        let info = RenderObjectLoadInfo {
            position: Vec3::zeros(),
            quads: vec![QuadLoadInfo::new("ghost", Vec2::new(1.0, 1.0)).with_animation(3)],
        };
        let handle = objects.load(&info, 0).unwrap();
        assert_eq!(objects.animation(handle, 0).unwrap(), 0);
        assert_eq!(objects.pool(PoolKind::Main).draw_infos()[0].texture_index, 0);
    }

    #[test]
    fn test_object_capacity_enforced() {
        let mut objects = RenderObjects::with_capacities([8, 0, 0], 1);
        let info = RenderObjectLoadInfo { position: Vec3::zeros(), quads: Vec::new() };
        objects.load(&info, 0).unwrap();
        assert!(matches!(objects.load(&info, 0), Err(RenderError::ObjectsExhausted(1))));
    }

    #[test]
    fn test_quad_replaced_in_place() {
        let mut objects = objects();
        let info = RenderObjectLoadInfo { position: Vec3::zeros(), quads: Vec::new() };
        let handle = objects.load(&info, 0).unwrap();
        objects.add_quad(handle, 3, &QuadLoadInfo::new("player", Vec2::new(1.0, 1.0)), 0).unwrap();
        objects.add_quad(handle, 3, &QuadLoadInfo::new("player", Vec2::new(2.0, 2.0)), 0).unwrap();
        assert_eq!(objects.quad_count(handle).unwrap(), 4);
        assert_eq!(objects.pool(PoolKind::Main).active_count(), 1);
        assert!(objects.remove_quad(handle, 3).unwrap());
        assert!(!objects.remove_quad(handle, 0).unwrap());
    }
}
