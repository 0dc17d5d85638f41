//! Render manager
//!
//! Owns the Vulkan context and mirrors the CPU-side render objects, textures
//! and areas onto the GPU. All calls happen on the game thread.

use std::path::{Path, PathBuf};

use ash::vk;

use crate::area::{Area, AreaError, Direction, Room, RoomCompositor, RoomSize, TransitionOutcome, NUM_ROOM_LAYERS};
use crate::assets::{load_texture_pixels, read_texture_pack, AssetError, TexturePixels};
use crate::config::PearlConfig;
use crate::foundation::math::{Vec2, Vec3};
use crate::render::backends::vulkan::rendering::CommandPool;
use crate::render::backends::vulkan::{
    FrameInput, FrameOrchestrator, FrameStatus, GpuImage, GpuTexture, MatrixPushConstants, PoolDraw,
    TileStitchStage, VulkanContext, Window, MAX_TEXTURES,
};
use crate::render::model_pool::GpuTransform;
use crate::render::texture_registry::{MISSING_TEXTURE_ID, ROOM_ATLAS_TEXTURE_ID};
use crate::render::{
    PoolKind, ProjectionBounds, RenderError, RenderObjectHandle, RenderObjectLoadInfo, RenderObjects, TextureFlags,
    TextureId, TextureInfo,
};

/// Composes rooms with the stitch stage once no frame can still sample the atlas
struct StitchCompositor<'a> {
    frames: &'a FrameOrchestrator,
    stitch: &'a mut TileStitchStage,
    atlas: &'a GpuImage,
}

impl RoomCompositor for StitchCompositor<'_> {
    fn stitch_room(&mut self, room: &Room, slot: usize) -> Result<(), RenderError> {
        self.frames.wait_all()?;
        self.stitch
            .stitch(room, self.atlas, slot)
            .map_err(|e| RenderError::StitchFailed(format!("room {} into slot {}: {}", room.id, slot, e)))
    }
}

/// Renderer front end used by the game loop
pub struct RenderManager {
    objects: RenderObjects,
    gpu_textures: Vec<Option<GpuTexture>>,
    tilemap: Option<TextureId>,
    room_atlas: TextureId,
    asset_dir: PathBuf,
    timeout_ms: u64,
    pool_draws: Vec<PoolDraw>,
    transforms: Vec<GpuTransform>,
    stitch: TileStitchStage,
    frames: FrameOrchestrator,
    upload_pool: CommandPool,
    context: VulkanContext,
}

impl RenderManager {
    /// Initialize Vulkan for `window` and create the placeholder and room atlas textures
    pub fn new(window: &mut Window, config: &PearlConfig) -> Result<Self, RenderError> {
        let renderer = &config.renderer;
        let context = VulkanContext::new(window, &renderer.application_name, renderer.validation_enabled())?;
        let timeout_ms = renderer.gpu_timeout_ms;

        let mut objects = RenderObjects::new(&config.pools);
        let (atlas_w, atlas_h) = RoomSize::LARGEST.pixel_extent();
        let atlas_layers = (config.area.cache_slots * NUM_ROOM_LAYERS) as u32;
        let room_atlas = objects
            .textures_mut()
            .register(TextureInfo::room_atlas(atlas_layers, [atlas_w, atlas_h]));

        let (width, height) = window.framebuffer_size();
        let frames = FrameOrchestrator::new(
            &context,
            renderer,
            vk::Extent2D { width, height },
            objects.total_models(),
        )?;
        let stitch = TileStitchStage::new(&context, Path::new(&renderer.shader_dir), timeout_ms)?;
        let upload_pool = CommandPool::new(context.raw().clone(), context.families().graphics)?;

        let pool_draws = objects
            .pools()
            .iter()
            .map(|pool| PoolDraw {
                first_model: pool.first_model(),
                capacity: pool.capacity(),
                wireframe: pool.kind() == PoolKind::Debug,
                apply_camera: pool.kind() != PoolKind::Gui,
            })
            .collect();

        let mut manager = Self {
            transforms: Vec::with_capacity(objects.total_models()),
            objects,
            gpu_textures: Vec::new(),
            tilemap: None,
            room_atlas,
            asset_dir: PathBuf::from(&config.game.asset_dir),
            timeout_ms,
            pool_draws,
            stitch,
            frames,
            upload_pool,
            context,
        };

        manager.ensure_texture(TextureId::MISSING)?;
        let atlas = GpuTexture::cleared(&manager.context, &manager.upload_pool, atlas_w, atlas_h, atlas_layers, timeout_ms)?;
        manager.install_texture(room_atlas, atlas)?;

        log::info!("Render manager ready ({} room atlas layers)", atlas_layers);
        Ok(manager)
    }

    /// CPU-side render objects and textures
    pub const fn objects(&self) -> &RenderObjects {
        &self.objects
    }

    /// Register every texture of an FGT pack; returns how many were registered
    ///
    /// Pre-loaded and tilemap textures are uploaded immediately, the rest on
    /// first use.
    pub fn load_texture_pack(&mut self, path: &Path) -> Result<usize, RenderError> {
        let bytes = std::fs::read(path).map_err(AssetError::from)?;
        let infos = read_texture_pack(&bytes)?;
        self.frames.wait_all()?;

        let mut registered = 0;
        for info in infos {
            if info.id == MISSING_TEXTURE_ID || info.id == ROOM_ATLAS_TEXTURE_ID {
                log::warn!("Texture pack may not redefine reserved texture '{}'", info.id);
                continue;
            }
            let tilemap = info.flags.contains(TextureFlags::TILEMAP);
            let mut eager = info.flags.intersects(TextureFlags::PRE_LOADED | TextureFlags::TILEMAP);
            let id = self.objects.textures_mut().register(info);
            // A replaced texture is re-uploaded at once so no descriptor keeps the old view.
            if let Some(slot) = self.gpu_textures.get_mut(id.0) {
                eager |= slot.take().is_some();
            }
            if tilemap {
                if let Some(previous) = self.tilemap.replace(id) {
                    if previous != id {
                        log::warn!("Texture pack defines more than one tilemap; using the last");
                    }
                }
            }
            if eager {
                self.ensure_texture(id)?;
            }
            registered += 1;
        }

        log::info!("Loaded {} textures from {}", registered, path.display());
        Ok(registered)
    }

    /// Compose the start room of `area` and create its room quads
    pub fn load_area(&mut self, area: &mut Area, start_room: usize) -> Result<(), AreaError> {
        let (objects, mut compositor) = self.compositor()?;
        area.reset_render_state(start_room, objects, &mut compositor)
    }

    /// Free the room quads of `area`
    pub fn unload_area(&mut self, area: &mut Area) {
        area.release_render_state(&mut self.objects);
    }

    /// Start moving into the neighbouring room, composing it on a cache miss
    pub fn transition_room(
        &mut self,
        area: &mut Area,
        direction: Direction,
        now_ms: u64,
    ) -> Result<TransitionOutcome, AreaError> {
        let (objects, mut compositor) = self.compositor()?;
        area.set_next_room(direction, now_ms, objects, &mut compositor)
    }

    /// Camera position for the frame shown at `now_ms`, finishing an elapsed
    /// transition first. Call once per displayed frame.
    pub fn camera_position(area: &mut Area, now_ms: u64) -> Vec2 {
        area.advance_if_complete(now_ms);
        area.camera_position(now_ms)
    }

    fn compositor(&mut self) -> Result<(&mut RenderObjects, StitchCompositor<'_>), RenderError> {
        if self.tilemap.is_none() {
            return Err(RenderError::TextureNotFound("no tilemap texture loaded".to_string()));
        }
        let atlas = self
            .gpu_textures
            .get(self.room_atlas.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| RenderError::TextureNotFound(ROOM_ATLAS_TEXTURE_ID.to_string()))?
            .image();
        Ok((
            &mut self.objects,
            StitchCompositor { frames: &self.frames, stitch: &mut self.stitch, atlas },
        ))
    }

    /// Create a render object, uploading any texture it needs for the first time
    pub fn load_render_object(&mut self, info: &RenderObjectLoadInfo, now_ms: u64) -> Result<RenderObjectHandle, RenderError> {
        for quad in &info.quads {
            let id = self.objects.textures().resolve(&quad.texture);
            self.ensure_texture(id)?;
        }
        self.objects.load(info, now_ms)
    }

    /// Destroy a render object
    pub fn unload_render_object(&mut self, handle: RenderObjectHandle) -> Result<(), RenderError> {
        self.objects.unload(handle)
    }

    /// Move a render object
    pub fn set_render_object_position(&mut self, handle: RenderObjectHandle, position: Vec3) -> Result<(), RenderError> {
        self.objects.set_position(handle, position)
    }

    /// Select the animation of one quad of a render object
    pub fn set_animation(
        &mut self,
        handle: RenderObjectHandle,
        quad: usize,
        animation: usize,
        now_ms: u64,
    ) -> Result<(), RenderError> {
        self.objects.set_animation(handle, quad, animation, now_ms)
    }

    /// Current animation of one quad of a render object
    pub fn animation(&self, handle: RenderObjectHandle, quad: usize) -> Result<usize, RenderError> {
        self.objects.animation(handle, quad)
    }

    /// Rebuild the swapchain before the next frame
    pub fn handle_resize(&mut self) {
        self.frames.request_recreate();
    }

    /// Draw one frame
    ///
    /// `tick_delta` is the fraction of the game tick elapsed since the last
    /// update; without interpolation models are drawn at their current transform.
    pub fn render_frame(
        &mut self,
        window: &Window,
        now_ms: u64,
        tick_delta: f32,
        camera: Vec2,
        bounds: ProjectionBounds,
        allow_interpolation: bool,
    ) -> Result<FrameStatus, RenderError> {
        self.objects.advance_animations(now_ms);
        self.frames.stage_models(self.objects.pools_mut())?;

        self.transforms.clear();
        for pool in self.objects.pools() {
            self.transforms.extend(pool.transforms().iter().map(GpuTransform::from));
        }

        let delta = if allow_interpolation { tick_delta } else { 1.0 };
        let matrices = MatrixPushConstants::new(bounds, camera, delta, self.transforms.len() as u32);
        let (width, height) = window.framebuffer_size();
        let input = FrameInput { transforms: &self.transforms, pools: &self.pool_draws, matrices };

        Ok(self.frames.render(&self.context, vk::Extent2D { width, height }, &input)?)
    }

    /// Upload a registered texture if it is not resident yet
    fn ensure_texture(&mut self, id: TextureId) -> Result<(), RenderError> {
        if self.gpu_textures.get(id.0).map_or(false, Option::is_some) {
            return Ok(());
        }
        let info = self
            .objects
            .textures()
            .get(id)
            .ok_or_else(|| RenderError::TextureNotFound(format!("#{}", id.0)))?;
        let pixels = if id == TextureId::MISSING {
            TexturePixels::checkerboard(info.cell_extent[0], info.cell_extent[1], info.cell_count())
        } else {
            load_texture_pixels(&self.asset_dir, info)
        };
        let storage = info.flags.contains(TextureFlags::TILEMAP);
        let texture = GpuTexture::upload(&self.context, &self.upload_pool, &pixels, storage, self.timeout_ms)?;
        log::debug!("Uploaded texture '{}' ({} layers)", info.id, pixels.layers);
        self.install_texture(id, texture)
    }

    fn install_texture(&mut self, id: TextureId, texture: GpuTexture) -> Result<(), RenderError> {
        if id.0 >= MAX_TEXTURES {
            return Err(RenderError::TextureNotFound(format!(
                "texture #{} exceeds the {} texture descriptors",
                id.0, MAX_TEXTURES
            )));
        }
        self.frames.set_texture(id.0, texture.image().view(), texture.layout())?;
        if Some(id) == self.tilemap {
            self.stitch.bind_tilemap(texture.image())?;
        }
        if self.gpu_textures.len() <= id.0 {
            self.gpu_textures.resize_with(id.0 + 1, || None);
        }
        self.gpu_textures[id.0] = Some(texture);
        Ok(())
    }
}

impl Drop for RenderManager {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("Failed to wait for device idle during shutdown: {}", e);
        }
    }
}
