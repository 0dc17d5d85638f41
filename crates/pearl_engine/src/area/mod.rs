//! Areas: grids of rooms and their scrolling render state

pub mod room;
pub mod slot_map;
pub mod render_state;

pub use room::{Direction, GridExtent, GridPos, Room, RoomSize, NUM_ROOM_LAYERS, TILE_SIZE_PX};
pub use slot_map::RoomSlotMap;
pub use render_state::{AreaRenderState, RoomCompositor, DEFAULT_TRANSITION_MS};

use thiserror::Error;

use crate::foundation::math::Vec2;
use crate::render::{RenderError, RenderObjects};

/// Fewest cache slots that allow scrolling between two rooms
pub const MIN_CACHE_SLOTS: usize = 2;

/// Area errors
#[derive(Error, Debug)]
pub enum AreaError {
    /// The render state has not been reset since the area was created
    #[error("Area render state not initialized")]
    NotInitialized,

    /// A transition was requested while another is still scrolling
    #[error("Room transition already in progress")]
    TransitionInProgress,

    /// Room id outside the area
    #[error("Room {room} out of range ({count} rooms)")]
    RoomOutOfRange {
        /// Requested room
        room: usize,
        /// Rooms in the area
        count: usize,
    },

    /// Every cache slot is pinned
    #[error("No evictable cache slot among {0}")]
    NoFreeSlot(usize),

    /// Rendering failed while composing or placing a room
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

impl AreaError {
    /// Whether the error leaves the area unusable
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Render(e) => e.is_fatal(),
            Self::NotInitialized | Self::RoomOutOfRange { .. } => true,
            Self::TransitionInProgress | Self::NoFreeSlot(_) => false,
        }
    }
}

/// Result of a transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// No room in that direction; nothing changed
    Blocked,
    /// The destination was already resident in `slot`
    CacheHit {
        /// Slot scrolled to
        slot: usize,
    },
    /// The destination was composed into `slot`
    CacheMiss {
        /// Slot scrolled to
        slot: usize,
    },
}

impl TransitionOutcome {
    /// Whether the room moved
    pub const fn started(self) -> bool {
        !matches!(self, Self::Blocked)
    }

    /// Whether a room had to be composed
    pub const fn composed(self) -> bool {
        matches!(self, Self::CacheMiss { .. })
    }
}

/// Parsed contents of an area file
#[derive(Debug, Clone, PartialEq)]
pub struct AreaData {
    /// Grid positions rooms may occupy
    pub extent: GridExtent,
    /// Size class of every room
    pub room_size: RoomSize,
    /// Rooms; each id equals its index
    pub rooms: Vec<Room>,
}

/// A level made of grid-connected rooms
#[derive(Debug)]
pub struct Area {
    extent: GridExtent,
    room_size: RoomSize,
    rooms: Vec<Room>,
    lookup: Vec<Option<usize>>,
    current_room: usize,
    render_state: AreaRenderState,
}

impl Area {
    /// Build an area with an uninitialized render state
    pub fn from_data(data: AreaData, cache_slots: usize, transition_ms: u64) -> Self {
        let mut lookup = vec![None; data.extent.width() * data.extent.height()];
        for room in &data.rooms {
            match data.extent.index_of(room.position) {
                Some(cell) => lookup[cell] = Some(room.id),
                None => log::warn!("Room {} lies outside the area extent", room.id),
            }
        }
        Self {
            extent: data.extent,
            room_size: data.room_size,
            rooms: data.rooms,
            lookup,
            current_room: 0,
            render_state: AreaRenderState::new(cache_slots.max(MIN_CACHE_SLOTS), transition_ms),
        }
    }

    /// Grid extent
    pub const fn extent(&self) -> GridExtent {
        self.extent
    }

    /// Room size class
    pub const fn room_size(&self) -> RoomSize {
        self.room_size
    }

    /// All rooms by id
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Room by id
    pub fn room(&self, id: usize) -> Option<&Room> {
        self.rooms.get(id)
    }

    /// Room at a grid position
    pub fn room_at(&self, position: GridPos) -> Option<&Room> {
        let cell = self.extent.index_of(position)?;
        self.lookup[cell].and_then(|id| self.rooms.get(id))
    }

    /// Id of the room the player is in; changes as soon as a transition starts
    pub const fn current_room_index(&self) -> usize {
        self.current_room
    }

    /// Room the player is in
    pub fn current_room(&self) -> Option<&Room> {
        self.rooms.get(self.current_room)
    }

    /// Neighbour of the current room
    pub fn neighbour(&self, direction: Direction) -> Option<&Room> {
        if direction == Direction::None {
            return None;
        }
        let room = self.current_room()?;
        self.room_at(room.position + direction.offset())
    }

    /// Scroll and cache state
    pub const fn render_state(&self) -> &AreaRenderState {
        &self.render_state
    }

    /// Whether the camera is scrolling between rooms
    pub const fn is_scrolling(&self) -> bool {
        self.render_state.is_scrolling()
    }

    /// Enter `start` and compose it into the first cache slot
    pub fn reset_render_state(
        &mut self,
        start: usize,
        objects: &mut RenderObjects,
        compositor: &mut dyn RoomCompositor,
    ) -> Result<(), AreaError> {
        self.render_state.reset(&self.rooms, start, objects, compositor)?;
        self.current_room = start;
        Ok(())
    }

    /// Free the area's render objects
    pub fn release_render_state(&mut self, objects: &mut RenderObjects) {
        self.render_state.release(objects);
    }

    /// Move into the neighbouring room in `direction`
    ///
    /// The logical room changes immediately; the camera follows over the
    /// transition duration.
    pub fn set_next_room(
        &mut self,
        direction: Direction,
        now_ms: u64,
        objects: &mut RenderObjects,
        compositor: &mut dyn RoomCompositor,
    ) -> Result<TransitionOutcome, AreaError> {
        if !self.render_state.is_initialized() {
            return Err(AreaError::NotInitialized);
        }
        if self.render_state.is_scrolling() {
            return Err(AreaError::TransitionInProgress);
        }
        let Some(destination) = self.neighbour(direction).map(|room| room.id) else {
            return Ok(TransitionOutcome::Blocked);
        };

        let outcome = self
            .render_state
            .set_next_room(&self.rooms[destination], now_ms, objects, compositor)?;
        log::info!("Room {} -> {} ({:?})", self.current_room, destination, outcome);
        self.current_room = destination;
        Ok(outcome)
    }

    /// Camera position at `now_ms`; never changes state
    pub fn camera_position(&self, now_ms: u64) -> Vec2 {
        let to = self.current_room().map_or_else(Vec2::zeros, Room::world_position);
        let from = self
            .render_state
            .slots()
            .room_in(self.render_state.current_slot())
            .and_then(|id| self.rooms.get(id))
            .map_or(to, Room::world_position);
        self.render_state.camera_position(from, to, now_ms)
    }

    /// Finish a transition whose duration has elapsed
    pub fn advance_if_complete(&mut self, now_ms: u64) -> bool {
        self.render_state.advance_if_complete(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::VulkanError;
    use crate::render::texture_registry::TextureInfo;
    use crate::render::{PoolKind, RenderObjects};
    use approx::assert_relative_eq;

    #[derive(Default)]
    struct CountingCompositor {
        stitches: Vec<(usize, usize)>,
        fail: bool,
    }

    impl RoomCompositor for CountingCompositor {
        fn stitch_room(&mut self, room: &Room, slot: usize) -> Result<(), RenderError> {
            if self.fail {
                return Err(RenderError::StitchFailed("test".to_string()));
            }
            self.stitches.push((room.id, slot));
            Ok(())
        }
    }

    fn grid_area(columns: i32, rows: i32, slots: usize) -> Area {
        let size = RoomSize::Medium;
        let mut rooms = Vec::new();
        for y in 0..rows {
            for x in 0..columns {
                rooms.push(Room {
                    id: rooms.len(),
                    position: GridPos::new(x, y),
                    size,
                    layers: [vec![1; size.tile_count()], vec![0; size.tile_count()]],
                    walls: Vec::new(),
                });
            }
        }
        let data = AreaData {
            extent: GridExtent { min: GridPos::new(0, 0), max: GridPos::new(columns - 1, rows - 1) },
            room_size: size,
            rooms,
        };
        Area::from_data(data, slots, DEFAULT_TRANSITION_MS)
    }

    fn objects_for(slots: usize) -> RenderObjects {
        let mut objects = RenderObjects::with_capacities([32, 8, 8], 16);
        objects.textures_mut().register(TextureInfo::room_atlas((slots * NUM_ROOM_LAYERS) as u32, [640, 400]));
        objects
    }

    fn assert_bijective(area: &Area) {
        let slots = area.render_state().slots();
        assert!(slots.is_consistent());
        for room in 0..area.rooms().len() {
            if let Some(slot) = slots.slot_of(room) {
                assert_eq!(slots.room_in(slot), Some(room));
            }
        }
    }

    #[test]
    fn test_reset_maps_start_room_to_slot_zero() {
        let mut area = grid_area(2, 2, 2);
        let mut objects = objects_for(2);
        let mut compositor = CountingCompositor::default();
        area.reset_render_state(3, &mut objects, &mut compositor).unwrap();
        assert_eq!(compositor.stitches, vec![(3, 0)]);
        assert_eq!(area.render_state().slots().slot_of(3), Some(0));
        assert_eq!(area.current_room_index(), 3);
        assert_eq!(objects.pool(PoolKind::Main).active_count(), 2);
        assert_relative_eq!(area.camera_position(0), Vec2::new(24.0, 15.0));
    }

    #[test]
    fn test_transition_before_reset_rejected() {
        let mut area = grid_area(2, 1, 2);
        let mut objects = objects_for(2);
        let mut compositor = CountingCompositor::default();
        assert!(matches!(
            area.set_next_room(Direction::East, 0, &mut objects, &mut compositor),
            Err(AreaError::NotInitialized)
        ));
    }

    #[test]
    fn test_miss_then_hit_scroll_cycle() {
        let mut area = grid_area(2, 2, 2);
        let mut objects = objects_for(2);
        let mut compositor = CountingCompositor::default();
        area.reset_render_state(0, &mut objects, &mut compositor).unwrap();

        let outcome = area.set_next_room(Direction::East, 1000, &mut objects, &mut compositor).unwrap();
        assert_eq!(outcome, TransitionOutcome::CacheMiss { slot: 1 });
        assert_eq!(area.render_state().next_slot(), 1);
        assert_eq!(compositor.stitches.len(), 2);
        assert_eq!(area.current_room_index(), 1);
        assert!(area.is_scrolling());
        assert_bijective(&area);

        assert_relative_eq!(area.camera_position(1512), Vec2::new(12.0, 0.0));
        assert!(!area.advance_if_complete(1512));
        assert!(area.advance_if_complete(2024));
        assert!(!area.is_scrolling());
        assert_relative_eq!(area.camera_position(2024), Vec2::new(24.0, 0.0));

        let outcome = area.set_next_room(Direction::West, 3000, &mut objects, &mut compositor).unwrap();
        assert_eq!(outcome, TransitionOutcome::CacheHit { slot: 0 });
        assert_eq!(compositor.stitches.len(), 2);
        assert_bijective(&area);
    }

    #[test]
    fn test_overlapping_transition_rejected() {
        let mut area = grid_area(3, 1, 2);
        let mut objects = objects_for(2);
        let mut compositor = CountingCompositor::default();
        area.reset_render_state(0, &mut objects, &mut compositor).unwrap();
        area.set_next_room(Direction::East, 0, &mut objects, &mut compositor).unwrap();
        assert!(matches!(
            area.set_next_room(Direction::East, 10, &mut objects, &mut compositor),
            Err(AreaError::TransitionInProgress)
        ));
        assert_eq!(area.current_room_index(), 1);
        assert_eq!(area.render_state().next_slot(), 1);
    }

    #[test]
    fn test_blocked_direction_changes_nothing() {
        let mut area = grid_area(2, 1, 2);
        let mut objects = objects_for(2);
        let mut compositor = CountingCompositor::default();
        area.reset_render_state(0, &mut objects, &mut compositor).unwrap();
        for direction in [Direction::North, Direction::West, Direction::South, Direction::None] {
            let outcome = area.set_next_room(direction, 0, &mut objects, &mut compositor).unwrap();
            assert_eq!(outcome, TransitionOutcome::Blocked);
        }
        assert!(!area.is_scrolling());
        assert_eq!(compositor.stitches.len(), 1);
    }

    #[test]
    fn test_failed_stitch_keeps_current_room() {
        let mut area = grid_area(2, 1, 2);
        let mut objects = objects_for(2);
        let mut compositor = CountingCompositor::default();
        area.reset_render_state(0, &mut objects, &mut compositor).unwrap();
        compositor.fail = true;
        assert!(matches!(
            area.set_next_room(Direction::East, 0, &mut objects, &mut compositor),
            Err(AreaError::Render(RenderError::StitchFailed(_)))
        ));
        assert_eq!(area.current_room_index(), 0);
        assert!(!area.is_scrolling());
        assert_eq!(area.render_state().slots().slot_of(1), None);
        assert_eq!(area.render_state().slots().room_in(1), None);
        assert_eq!(objects.pool(PoolKind::Main).active_count(), 2);
    }

    #[test]
    fn test_stitch_failure_is_recoverable() {
        assert!(!AreaError::Render(RenderError::StitchFailed("slot 1".to_string())).is_fatal());
        assert!(!AreaError::TransitionInProgress.is_fatal());
        assert!(AreaError::NotInitialized.is_fatal());
        assert!(AreaError::Render(RenderError::Vulkan(VulkanError::Timeout { what: "stitch copy", timeout_ms: 10 })).is_fatal());
    }

    #[test]
    fn test_failed_stitch_forgets_evicted_room() {
        let mut area = grid_area(3, 1, 2);
        let mut objects = objects_for(2);
        let mut compositor = CountingCompositor::default();
        area.reset_render_state(0, &mut objects, &mut compositor).unwrap();
        area.set_next_room(Direction::East, 0, &mut objects, &mut compositor).unwrap();
        assert!(area.advance_if_complete(DEFAULT_TRANSITION_MS));
        assert_eq!(area.current_room_index(), 1);

        // Room 0 in slot 0 is evicted for room 2, whose stitch then fails.
        compositor.fail = true;
        assert!(area.set_next_room(Direction::East, DEFAULT_TRANSITION_MS, &mut objects, &mut compositor).is_err());
        assert_eq!(area.render_state().slots().room_in(0), None);
        assert_eq!(area.render_state().slots().slot_of(0), None);
        assert_eq!(area.render_state().slots().slot_of(1), Some(1));
        assert_bijective(&area);

        // Walking back must compose room 0 again instead of sampling the overwritten slot.
        compositor.fail = false;
        let outcome = area
            .set_next_room(Direction::West, DEFAULT_TRANSITION_MS, &mut objects, &mut compositor)
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::CacheMiss { slot: 0 });
        assert_eq!(compositor.stitches.last(), Some(&(0, 0)));
    }

    #[test]
    fn test_eviction_never_touches_current_slot() {
        let mut area = grid_area(4, 1, 2);
        let mut objects = objects_for(2);
        let mut compositor = CountingCompositor::default();
        area.reset_render_state(0, &mut objects, &mut compositor).unwrap();
        let mut now = 0;
        for _ in 0..3 {
            let current = area.render_state().current_slot();
            let outcome = area.set_next_room(Direction::East, now, &mut objects, &mut compositor).unwrap();
            assert!(outcome.composed());
            assert_ne!(area.render_state().next_slot(), current);
            now += DEFAULT_TRANSITION_MS;
            assert!(area.advance_if_complete(now));
            assert_bijective(&area);
            assert_eq!(objects.pool(PoolKind::Main).active_count(), 4);
        }
        assert_eq!(area.current_room_index(), 3);
    }

    #[test]
    fn test_lru_eviction_with_three_slots() {
        let mut area = grid_area(4, 1, 3);
        let mut objects = objects_for(3);
        let mut compositor = CountingCompositor::default();
        area.reset_render_state(0, &mut objects, &mut compositor).unwrap();
        let mut now = 0;
        let mut step = |area: &mut Area, direction, objects: &mut RenderObjects, compositor: &mut CountingCompositor| {
            let outcome = area.set_next_room(direction, now, objects, compositor).unwrap();
            now += DEFAULT_TRANSITION_MS;
            area.advance_if_complete(now);
            outcome
        };
        assert_eq!(step(&mut area, Direction::East, &mut objects, &mut compositor), TransitionOutcome::CacheMiss { slot: 1 });
        assert_eq!(step(&mut area, Direction::East, &mut objects, &mut compositor), TransitionOutcome::CacheMiss { slot: 2 });
        assert_eq!(step(&mut area, Direction::West, &mut objects, &mut compositor), TransitionOutcome::CacheHit { slot: 1 });
        assert_eq!(step(&mut area, Direction::East, &mut objects, &mut compositor), TransitionOutcome::CacheHit { slot: 2 });
        // room 0 in slot 0 is the least recently used
        assert_eq!(step(&mut area, Direction::East, &mut objects, &mut compositor), TransitionOutcome::CacheMiss { slot: 0 });
        assert_eq!(area.render_state().slots().room_in(0), Some(3));
        assert_bijective(&area);
    }
}
