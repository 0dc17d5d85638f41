//! Fixed-capacity model pools with paint-ordered draw infos
//!
//! Each pool owns a contiguous range of the global model index space and of
//! the shared vertex buffer. Models are single quads. The pool keeps a
//! densely packed array of indirect draw records in paint order, plus the
//! reverse index from model to its record, and queues the GPU uploads every
//! mutation requires.

use bytemuck::{Pod, Zeroable};

use super::texture_registry::{TextureInfo, TextureState};
use super::{PoolError, PoolKind};
use crate::foundation::math::{Vec2, Vec3, Vec4};

/// Vertices per quad
pub const VERTICES_PER_QUAD: usize = 4;

/// Shared index list of every quad
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Quad vertex as laid out in the vertex buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Model-space position
    pub position: [f32; 2],
    /// Texture coordinate within the sampled layer
    pub uv: [f32; 2],
    /// Tint multiplied with the texel
    pub color: [f32; 4],
}

/// Indirect draw command extended with texture selection
///
/// The first five fields match `VkDrawIndexedIndirectCommand`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DrawInfo {
    /// Always six
    pub index_count: u32,
    /// Always one
    pub instance_count: u32,
    /// Always zero
    pub first_index: u32,
    /// First vertex of the quad in the shared vertex buffer
    pub vertex_offset: i32,
    /// Global model index, used by shaders to find the model matrix
    pub first_instance: u32,
    /// Texture descriptor slot
    pub texture_index: u32,
    /// Array layer sampled
    pub image_index: u32,
    /// Model index local to the owning pool
    pub model_index: u32,
}

/// Translation, scale and rotation of a model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// World position; z orders painting
    pub translation: Vec3,
    /// Per-axis scale
    pub scale: Vec3,
    /// Euler angles in radians
    pub rotation: Vec3,
}

impl Transform {
    /// Unscaled, unrotated transform at `translation`
    pub fn at(translation: Vec3) -> Self {
        Self { translation, scale: Vec3::new(1.0, 1.0, 1.0), rotation: Vec3::zeros() }
    }
}

/// Current and previous tick transform, interpolated on the GPU
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelTransform {
    /// Value for the latest tick
    pub current: Transform,
    /// Value for the tick before
    pub previous: Transform,
}

impl Default for ModelTransform {
    fn default() -> Self {
        let transform = Transform::at(Vec3::zeros());
        Self { current: transform, previous: transform }
    }
}

/// Transform as read by the matrix compute shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct GpuTransform {
    /// Current translation
    pub translation: [f32; 4],
    /// Previous translation
    pub previous_translation: [f32; 4],
    /// Current scale
    pub scale: [f32; 4],
    /// Previous scale
    pub previous_scale: [f32; 4],
    /// Current rotation
    pub rotation: [f32; 4],
    /// Previous rotation
    pub previous_rotation: [f32; 4],
}

impl From<&ModelTransform> for GpuTransform {
    fn from(t: &ModelTransform) -> Self {
        let pad = |v: Vec3| [v.x, v.y, v.z, 0.0];
        Self {
            translation: pad(t.current.translation),
            previous_translation: pad(t.previous.translation),
            scale: pad(t.current.scale),
            previous_scale: pad(t.previous.scale),
            rotation: pad(t.current.rotation),
            previous_rotation: pad(t.previous.rotation),
        }
    }
}

/// Geometry of a quad to load
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadDesc {
    /// Top-left corner in world space; z orders painting
    pub translation: Vec3,
    /// Width and height in world units
    pub dimensions: Vec2,
    /// Portion of the texture layer covered, from the top-left
    pub uv_extent: Vec2,
    /// Tint
    pub color: Vec4,
}

/// Upload a pool mutation requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolUpload {
    /// Four vertices of a local model
    Vertices(usize),
    /// Whole draw-info array and the draw count
    AllDrawInfos,
    /// One draw-info record at a paint-order position
    DrawInfo(usize),
}

/// Fixed-capacity pool of quads
pub struct ModelPool {
    kind: PoolKind,
    first_model: usize,
    slot_flags: Vec<bool>,
    transforms: Vec<ModelTransform>,
    texture_states: Vec<Option<TextureState>>,
    vertices: Vec<[Vertex; VERTICES_PER_QUAD]>,
    draw_infos: Vec<DrawInfo>,
    draw_info_indices: Vec<usize>,
    pending: Vec<PoolUpload>,
}

impl ModelPool {
    /// Empty pool owning global models `first_model..first_model + capacity`
    pub fn new(kind: PoolKind, first_model: usize, capacity: usize) -> Self {
        Self {
            kind,
            first_model,
            slot_flags: vec![false; capacity],
            transforms: vec![ModelTransform::default(); capacity],
            texture_states: vec![None; capacity],
            vertices: vec![[Vertex::default(); VERTICES_PER_QUAD]; capacity],
            draw_infos: Vec::with_capacity(capacity),
            draw_info_indices: vec![0; capacity],
            pending: Vec::new(),
        }
    }

    /// Which pool this is
    pub const fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Maximum number of live models
    pub fn capacity(&self) -> usize {
        self.slot_flags.len()
    }

    /// First global model index
    pub const fn first_model(&self) -> usize {
        self.first_model
    }

    /// First vertex in the shared vertex buffer
    pub const fn first_vertex(&self) -> usize {
        self.first_model * VERTICES_PER_QUAD
    }

    /// Number of live models, which is also the draw count
    pub fn active_count(&self) -> usize {
        self.draw_infos.len()
    }

    /// Whether a local model slot is in use
    pub fn is_active(&self, model: usize) -> bool {
        self.slot_flags.get(model).copied().unwrap_or(false)
    }

    /// Draw records in paint order
    pub fn draw_infos(&self) -> &[DrawInfo] {
        &self.draw_infos
    }

    /// Paint-order position of a live model
    pub fn draw_info_index(&self, model: usize) -> Option<usize> {
        self.is_active(model).then(|| self.draw_info_indices[model])
    }

    /// Transforms of every slot, live or not
    pub fn transforms(&self) -> &[ModelTransform] {
        &self.transforms
    }

    /// Vertices of a slot
    pub fn vertices(&self, model: usize) -> Option<&[Vertex; VERTICES_PER_QUAD]> {
        self.vertices.get(model)
    }

    /// Animation state of a live model
    pub fn texture_state(&self, model: usize) -> Option<&TextureState> {
        self.texture_states.get(model).and_then(Option::as_ref)
    }

    /// Load a quad into the first free slot, returning its local model index
    pub fn load(&mut self, desc: &QuadDesc, texture: TextureState) -> Result<usize, PoolError> {
        let model = self
            .slot_flags
            .iter()
            .position(|&used| !used)
            .ok_or(PoolError::PoolExhausted { kind: self.kind, capacity: self.capacity() })?;

        self.slot_flags[model] = true;
        self.transforms[model] = ModelTransform {
            current: Transform::at(desc.translation),
            previous: Transform::at(desc.translation),
        };
        self.texture_states[model] = Some(texture);
        self.vertices[model] = quad_vertices(desc);

        let z = desc.translation.z;
        let position = self
            .draw_infos
            .iter()
            .position(|info| self.transforms[info.model_index as usize].current.translation.z > z)
            .unwrap_or(self.draw_infos.len());
        let record = self.draw_info_for(model, &texture);
        self.draw_infos.insert(position, record);
        self.reindex_from(position);

        self.queue_upload(PoolUpload::Vertices(model));
        self.queue_upload(PoolUpload::AllDrawInfos);
        log::trace!("{:?} pool: loaded model {} at paint position {}", self.kind, model, position);
        Ok(model)
    }

    /// Free a slot, closing the gap in paint order. Returns `false` for a slot
    /// that was not in use.
    pub fn unload(&mut self, model: usize) -> Result<bool, PoolError> {
        if model >= self.capacity() {
            return Err(PoolError::InvalidModel { model, capacity: self.capacity() });
        }
        if !self.slot_flags[model] {
            return Ok(false);
        }

        let position = self.draw_info_indices[model];
        if position < self.draw_infos.len() && self.draw_infos[position].model_index as usize == model {
            self.draw_infos.remove(position);
            self.reindex_from(position);
        } else {
            log::error!("{:?} pool: model {} has no draw info at {}", self.kind, model, position);
        }

        self.slot_flags[model] = false;
        self.texture_states[model] = None;
        self.queue_upload(PoolUpload::AllDrawInfos);
        Ok(true)
    }

    /// Move a model, keeping its old translation for interpolation
    pub fn set_translation(&mut self, model: usize, translation: Vec3) -> Result<(), PoolError> {
        let transform = self.transform_mut(model)?;
        transform.previous.translation = transform.current.translation;
        transform.current.translation = translation;
        Ok(())
    }

    /// Rescale a model, keeping its old scale for interpolation
    pub fn set_scaling(&mut self, model: usize, scale: Vec3) -> Result<(), PoolError> {
        let transform = self.transform_mut(model)?;
        transform.previous.scale = transform.current.scale;
        transform.current.scale = scale;
        Ok(())
    }

    /// Rotate a model, keeping its old rotation for interpolation
    pub fn set_rotation(&mut self, model: usize, rotation: Vec3) -> Result<(), PoolError> {
        let transform = self.transform_mut(model)?;
        transform.previous.rotation = transform.current.rotation;
        transform.current.rotation = rotation;
        Ok(())
    }

    /// Select another animation of the model's texture
    pub fn set_animation(&mut self, model: usize, info: &TextureInfo, animation: usize, now_ms: u64) -> Result<(), PoolError> {
        let state = self.state_mut(model)?;
        state.set_animation(info, animation, now_ms)?;
        self.update_image_index(model)
    }

    /// Step the animations of every live model
    pub fn advance_animations(&mut self, now_ms: u64) -> usize {
        let mut changed = 0;
        for model in 0..self.capacity() {
            let advanced = self.texture_states[model]
                .as_mut()
                .map_or(false, |state| state.advance(now_ms));
            if advanced && self.update_image_index(model).is_ok() {
                changed += 1;
            }
        }
        changed
    }

    /// Drain queued uploads
    pub fn take_uploads(&mut self) -> Vec<PoolUpload> {
        std::mem::take(&mut self.pending)
    }

    /// Whether any upload is queued
    pub fn has_pending_uploads(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Queue an upload, merging it with what is already queued so the queue
    /// never holds more than one entry per model, per paint position and a
    /// single full draw-info upload
    fn queue_upload(&mut self, upload: PoolUpload) {
        let covered = self.pending.contains(&upload)
            || (matches!(upload, PoolUpload::DrawInfo(_)) && self.pending.contains(&PoolUpload::AllDrawInfos));
        if covered {
            return;
        }
        if upload == PoolUpload::AllDrawInfos {
            self.pending.retain(|queued| !matches!(queued, PoolUpload::DrawInfo(_)));
        }
        self.pending.push(upload);
    }

    fn update_image_index(&mut self, model: usize) -> Result<(), PoolError> {
        let image_index = self.state_mut(model)?.image_index();
        let position = self.draw_info_indices[model];
        if let Some(record) = self.draw_infos.get_mut(position) {
            record.image_index = image_index;
            self.queue_upload(PoolUpload::DrawInfo(position));
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn draw_info_for(&self, model: usize, texture: &TextureState) -> DrawInfo {
        DrawInfo {
            index_count: QUAD_INDICES.len() as u32,
            instance_count: 1,
            first_index: 0,
            vertex_offset: (self.first_vertex() + model * VERTICES_PER_QUAD) as i32,
            first_instance: (self.first_model + model) as u32,
            texture_index: texture.texture.0 as u32,
            image_index: texture.image_index(),
            model_index: model as u32,
        }
    }

    fn reindex_from(&mut self, position: usize) {
        for (offset, record) in self.draw_infos[position..].iter().enumerate() {
            self.draw_info_indices[record.model_index as usize] = position + offset;
        }
    }

    fn transform_mut(&mut self, model: usize) -> Result<&mut ModelTransform, PoolError> {
        if !self.is_active(model) {
            return Err(PoolError::InvalidModel { model, capacity: self.capacity() });
        }
        Ok(&mut self.transforms[model])
    }

    fn state_mut(&mut self, model: usize) -> Result<&mut TextureState, PoolError> {
        let capacity = self.capacity();
        self.texture_states
            .get_mut(model)
            .and_then(Option::as_mut)
            .ok_or(PoolError::InvalidModel { model, capacity })
    }
}

fn quad_vertices(desc: &QuadDesc) -> [Vertex; VERTICES_PER_QUAD] {
    let (w, h) = (desc.dimensions.x, desc.dimensions.y);
    let (u, v) = (desc.uv_extent.x, desc.uv_extent.y);
    let color = [desc.color.x, desc.color.y, desc.color.z, desc.color.w];
    [
        Vertex { position: [0.0, 0.0], uv: [0.0, 0.0], color },
        Vertex { position: [w, 0.0], uv: [u, 0.0], color },
        Vertex { position: [w, h], uv: [u, v], color },
        Vertex { position: [0.0, h], uv: [0.0, v], color },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::texture_registry::{TextureId, TextureInfo};

    fn quad_at(z: f32) -> QuadDesc {
        QuadDesc {
            translation: Vec3::new(0.0, 0.0, z),
            dimensions: Vec2::new(1.0, 1.0),
            uv_extent: Vec2::new(1.0, 1.0),
            color: Vec4::new(1.0, 1.0, 1.0, 1.0),
        }
    }

    fn still() -> TextureState {
        TextureState::new(TextureId::MISSING, &TextureInfo::missing(), 0, 0).unwrap()
    }

    fn assert_indices_consistent(pool: &ModelPool) {
        for model in 0..pool.capacity() {
            if let Some(position) = pool.draw_info_index(model) {
                assert_eq!(pool.draw_infos()[position].model_index as usize, model);
            }
        }
        assert_eq!(
            pool.draw_infos().len(),
            (0..pool.capacity()).filter(|&m| pool.is_active(m)).count()
        );
    }

    #[test]
    fn test_equal_z_keeps_insertion_order() {
        let mut pool = ModelPool::new(PoolKind::Main, 0, 8);
        let a = pool.load(&quad_at(0.0), still()).unwrap();
        let b = pool.load(&quad_at(1.0), still()).unwrap();
        let c = pool.load(&quad_at(0.0), still()).unwrap();
        let order: Vec<usize> = pool.draw_infos().iter().map(|d| d.model_index as usize).collect();
        assert_eq!(order, vec![a, c, b]);
        assert_indices_consistent(&pool);
    }

    #[test]
    fn test_lower_z_inserted_first() {
        let mut pool = ModelPool::new(PoolKind::Main, 0, 8);
        pool.load(&quad_at(0.0), still()).unwrap();
        let background = pool.load(&quad_at(-2.0), still()).unwrap();
        assert_eq!(pool.draw_infos()[0].model_index as usize, background);
        assert_eq!(pool.draw_info_index(background), Some(0));
    }

    #[test]
    fn test_unload_closes_gap_and_reindexes() {
        let mut pool = ModelPool::new(PoolKind::Main, 0, 8);
        let models: Vec<usize> = (0..5).map(|i| pool.load(&quad_at(i as f32), still()).unwrap()).collect();
        assert!(pool.unload(models[1]).unwrap());
        assert!(!pool.unload(models[1]).unwrap());
        let order: Vec<usize> = pool.draw_infos().iter().map(|d| d.model_index as usize).collect();
        assert_eq!(order, vec![models[0], models[2], models[3], models[4]]);
        assert_indices_consistent(&pool);

        let reused = pool.load(&quad_at(10.0), still()).unwrap();
        assert_eq!(reused, models[1]);
        assert_indices_consistent(&pool);
    }

    #[test]
    fn test_exhausted_pool_unchanged() {
        let mut pool = ModelPool::new(PoolKind::Debug, 0, 2);
        pool.load(&quad_at(0.0), still()).unwrap();
        pool.load(&quad_at(0.0), still()).unwrap();
        let before = pool.draw_infos().to_vec();
        assert!(matches!(
            pool.load(&quad_at(0.0), still()),
            Err(PoolError::PoolExhausted { capacity: 2, .. })
        ));
        assert_eq!(pool.draw_infos(), before.as_slice());
    }

    #[test]
    fn test_set_translation_shifts_previous() {
        let mut pool = ModelPool::new(PoolKind::Main, 0, 2);
        let model = pool.load(&quad_at(0.0), still()).unwrap();
        pool.set_translation(model, Vec3::new(2.0, 3.0, 0.0)).unwrap();
        pool.set_translation(model, Vec3::new(4.0, 3.0, 0.0)).unwrap();
        let transform = pool.transforms()[model];
        assert_eq!(transform.previous.translation, Vec3::new(2.0, 3.0, 0.0));
        assert_eq!(transform.current.translation, Vec3::new(4.0, 3.0, 0.0));
        assert!(pool.set_translation(1, Vec3::zeros()).is_err());
    }

    #[test]
    fn test_global_offsets_in_draw_info() {
        let mut pool = ModelPool::new(PoolKind::Gui, 10, 4);
        let model = pool.load(&quad_at(0.0), still()).unwrap();
        let record = pool.draw_infos()[0];
        assert_eq!(record.first_instance, 10);
        assert_eq!(record.vertex_offset, 40);
        assert_eq!(record.index_count, 6);
        assert_eq!(model, 0);
        assert_eq!(std::mem::size_of::<DrawInfo>(), 32);
    }

    #[test]
    fn test_animation_update_queues_single_record() {
        let info = TextureInfo {
            animations: vec![
                crate::render::texture_registry::Animation { start_cell: 0, frame_count: 2, fps: 10 },
            ],
            cell_grid: [2, 1],
            ..TextureInfo::missing()
        };
        let mut pool = ModelPool::new(PoolKind::Main, 0, 2);
        let state = TextureState::new(TextureId(1), &info, 0, 0).unwrap();
        let model = pool.load(&quad_at(0.0), state).unwrap();
        pool.take_uploads();
        assert_eq!(pool.advance_animations(100), 1);
        assert_eq!(pool.draw_infos()[0].image_index, 1);
        assert_eq!(pool.take_uploads(), vec![PoolUpload::DrawInfo(0)]);
        assert!(pool.set_animation(model, &info, 3, 100).is_err());
    }

    #[test]
    fn test_undrained_uploads_stay_bounded() {
        let info = TextureInfo {
            animations: vec![
                crate::render::texture_registry::Animation { start_cell: 0, frame_count: 2, fps: 10 },
            ],
            cell_grid: [2, 1],
            ..TextureInfo::missing()
        };
        let mut pool = ModelPool::new(PoolKind::Main, 0, 4);
        let resident = pool.load(&quad_at(1.0), TextureState::new(TextureId(1), &info, 0, 0).unwrap()).unwrap();
        for round in 0..1000u64 {
            let state = TextureState::new(TextureId(1), &info, 0, round * 100).unwrap();
            let model = pool.load(&quad_at(0.0), state).unwrap();
            pool.advance_animations(round * 100 + 100);
            pool.unload(model).unwrap();
        }
        assert!(pool.is_active(resident));
        let uploads = pool.take_uploads();
        assert!(uploads.len() <= 2 * pool.capacity() + 1, "{} queued uploads", uploads.len());
        assert_eq!(uploads.iter().filter(|u| **u == PoolUpload::AllDrawInfos).count(), 1);
        assert!(!uploads.iter().any(|u| matches!(u, PoolUpload::DrawInfo(_))));
    }

    #[test]
    fn test_single_record_upload_after_full_upload_is_merged() {
        let mut pool = ModelPool::new(PoolKind::Main, 0, 2);
        pool.queue_upload(PoolUpload::DrawInfo(1));
        pool.queue_upload(PoolUpload::DrawInfo(1));
        assert_eq!(pool.take_uploads(), vec![PoolUpload::DrawInfo(1)]);

        pool.queue_upload(PoolUpload::DrawInfo(0));
        pool.queue_upload(PoolUpload::AllDrawInfos);
        pool.queue_upload(PoolUpload::DrawInfo(1));
        assert_eq!(pool.take_uploads(), vec![PoolUpload::AllDrawInfos]);
    }
}
