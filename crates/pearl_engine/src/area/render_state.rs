//! Room texture caching and camera scrolling for one area
//!
//! A small, fixed number of cache slots hold composited room images in the
//! shared room atlas. Slot `s` owns atlas layers `s * NUM_ROOM_LAYERS..`, and
//! the area's room render object keeps the quad for slot `s`, layer `l` at
//! quad index `s * NUM_ROOM_LAYERS + l` with animation index equal to that
//! same atlas layer.
//!
//! The machine is either static (`current_slot == next_slot`) or scrolling
//! from the current slot's room to the next slot's room. Scrolling ends only
//! through [`AreaRenderState::advance_if_complete`].

use super::room::{Room, NUM_ROOM_LAYERS, RoomSize};
use super::slot_map::RoomSlotMap;
use super::{AreaError, TransitionOutcome};
use crate::foundation::math::{lerp_vec2, Vec2, Vec3};
use crate::render::texture_registry::ROOM_ATLAS_TEXTURE_ID;
use crate::render::{QuadLoadInfo, RenderError, RenderObjectHandle, RenderObjectLoadInfo, RenderObjects};

/// Paint depth of each room layer
pub const ROOM_LAYER_DEPTHS: [f32; NUM_ROOM_LAYERS] = [-2.0, -1.0];

/// Default scroll duration between rooms
pub const DEFAULT_TRANSITION_MS: u64 = 1024;

/// Composes a room's tile layers into the atlas layers of a cache slot
pub trait RoomCompositor {
    /// Write `room` into atlas layers `slot * NUM_ROOM_LAYERS..` and return
    /// once the result is safe to sample. On error the layers are undefined.
    fn stitch_room(&mut self, room: &Room, slot: usize) -> Result<(), RenderError>;
}

/// Cache-slot bookkeeping and scroll state of an area
#[derive(Debug)]
pub struct AreaRenderState {
    slots: RoomSlotMap,
    current_slot: usize,
    next_slot: usize,
    scroll_start_ms: u64,
    transition_ms: u64,
    room_object: Option<RenderObjectHandle>,
}

impl AreaRenderState {
    /// Unloaded state for `slot_count` cache slots
    pub fn new(slot_count: usize, transition_ms: u64) -> Self {
        Self {
            slots: RoomSlotMap::new(0, slot_count),
            current_slot: 0,
            next_slot: 0,
            scroll_start_ms: 0,
            transition_ms,
            room_object: None,
        }
    }

    /// Whether [`Self::reset`] has succeeded
    pub const fn is_initialized(&self) -> bool {
        self.room_object.is_some()
    }

    /// Number of cache slots
    pub fn slot_count(&self) -> usize {
        self.slots.slot_count()
    }

    /// Slot of the room on screen
    pub const fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Slot of the room being scrolled to; equals the current slot when static
    pub const fn next_slot(&self) -> usize {
        self.next_slot
    }

    /// Room ↔ slot mapping
    pub const fn slots(&self) -> &RoomSlotMap {
        &self.slots
    }

    /// Render object holding the room quads
    pub const fn room_object(&self) -> Option<RenderObjectHandle> {
        self.room_object
    }

    /// Scroll duration
    pub const fn transition_ms(&self) -> u64 {
        self.transition_ms
    }

    /// Time the running scroll began
    pub const fn scroll_start_ms(&self) -> u64 {
        self.scroll_start_ms
    }

    /// Whether a transition is in progress
    pub const fn is_scrolling(&self) -> bool {
        self.current_slot != self.next_slot
    }

    /// Map `start` into slot 0, compose it and create the room quads
    pub fn reset(
        &mut self,
        rooms: &[Room],
        start: usize,
        objects: &mut RenderObjects,
        compositor: &mut dyn RoomCompositor,
    ) -> Result<(), AreaError> {
        let room = rooms
            .get(start)
            .ok_or(AreaError::RoomOutOfRange { room: start, count: rooms.len() })?;
        self.release(objects);

        self.slots = RoomSlotMap::new(rooms.len(), self.slots.slot_count());
        self.current_slot = 0;
        self.next_slot = 0;
        self.scroll_start_ms = 0;

        compositor.stitch_room(room, 0)?;
        let handle = objects.load(&RenderObjectLoadInfo { position: Vec3::zeros(), quads: Vec::new() }, 0)?;
        if let Err(e) = Self::load_room_quads(objects, handle, room, 0) {
            objects.unload(handle)?;
            return Err(e.into());
        }
        self.room_object = Some(handle);
        self.slots.insert(room.id, 0);
        log::info!("Area render state reset: room {} in slot 0", room.id);
        Ok(())
    }

    /// Free the room quads; the state must be reset before further use
    pub fn release(&mut self, objects: &mut RenderObjects) {
        if let Some(handle) = self.room_object.take() {
            if let Err(e) = objects.unload(handle) {
                log::warn!("Room quads already released: {}", e);
            }
        }
    }

    /// Start scrolling to `destination`, composing it first if no slot holds it
    pub fn set_next_room(
        &mut self,
        destination: &Room,
        now_ms: u64,
        objects: &mut RenderObjects,
        compositor: &mut dyn RoomCompositor,
    ) -> Result<TransitionOutcome, AreaError> {
        let handle = self.room_object.ok_or(AreaError::NotInitialized)?;
        if self.is_scrolling() {
            return Err(AreaError::TransitionInProgress);
        }

        if let Some(slot) = self.slots.slot_of(destination.id) {
            self.begin_scroll(slot, now_ms);
            log::debug!("Room {} already resident in slot {}", destination.id, slot);
            return Ok(TransitionOutcome::CacheHit { slot });
        }

        let slot = self
            .slots
            .eviction_candidate(&[self.current_slot])
            .ok_or(AreaError::NoFreeSlot(self.slots.slot_count()))?;

        // The slot stops claiming its old room before any of its layers are overwritten.
        if let Some(evicted) = self.slots.remove_slot(slot) {
            log::debug!("Evicting room {} from slot {}", evicted, slot);
        }
        compositor.stitch_room(destination, slot)?;

        for layer in 0..NUM_ROOM_LAYERS {
            objects.remove_quad(handle, slot * NUM_ROOM_LAYERS + layer)?;
        }
        Self::load_room_quads(objects, handle, destination, slot)?;
        self.slots.insert(destination.id, slot);
        self.begin_scroll(slot, now_ms);

        log::debug!("Room {} composed into slot {}", destination.id, slot);
        Ok(TransitionOutcome::CacheMiss { slot })
    }

    /// Camera position at `now_ms`, between `from` and `to` while scrolling.
    /// Never changes state.
    pub fn camera_position(&self, from: Vec2, to: Vec2, now_ms: u64) -> Vec2 {
        if !self.is_scrolling() {
            return from;
        }
        let t = self.progress(now_ms);
        if t >= 1.0 {
            to
        } else {
            lerp_vec2(from, to, t)
        }
    }

    /// End the transition once its duration has elapsed; returns whether it ended
    pub fn advance_if_complete(&mut self, now_ms: u64) -> bool {
        if !self.is_scrolling() || self.progress(now_ms) < 1.0 {
            return false;
        }
        self.current_slot = self.next_slot;
        self.slots.touch(self.current_slot);
        log::trace!("Scroll into slot {} complete", self.current_slot);
        true
    }

    /// Fraction of the transition elapsed, clamped to `[0, 1]`
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self, now_ms: u64) -> f32 {
        if self.transition_ms == 0 {
            return 1.0;
        }
        let elapsed = now_ms.saturating_sub(self.scroll_start_ms);
        (elapsed as f32 / self.transition_ms as f32).clamp(0.0, 1.0)
    }

    fn begin_scroll(&mut self, slot: usize, now_ms: u64) {
        self.next_slot = slot;
        self.scroll_start_ms = now_ms;
        self.slots.touch(slot);
    }

    fn load_room_quads(
        objects: &mut RenderObjects,
        handle: RenderObjectHandle,
        room: &Room,
        slot: usize,
    ) -> Result<(), RenderError> {
        let origin = room.world_position();
        let uv_extent = room_uv_extent(room.size);
        for (layer, depth) in ROOM_LAYER_DEPTHS.iter().enumerate() {
            let atlas_layer = slot * NUM_ROOM_LAYERS + layer;
            let quad = QuadLoadInfo::new(ROOM_ATLAS_TEXTURE_ID, room.size.world_extent())
                .with_offset(Vec3::new(origin.x, origin.y, *depth))
                .with_animation(atlas_layer)
                .with_uv_extent(uv_extent);
            objects.add_quad(handle, atlas_layer, &quad, 0)?;
        }
        Ok(())
    }
}

/// Portion of an atlas layer a room of `size` covers
#[allow(clippy::cast_precision_loss)]
pub fn room_uv_extent(size: RoomSize) -> Vec2 {
    let (w, h) = size.pixel_extent();
    let (max_w, max_h) = RoomSize::LARGEST.pixel_extent();
    Vec2::new(w as f32 / max_w as f32, h as f32 / max_h as f32)
}
