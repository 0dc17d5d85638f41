//! End-to-end room scrolling over parsed area files
//!
//! Drives the public area and render-object API with a compositor that only
//! counts stitch requests, so no GPU is needed.

use pearl_engine::area::{
    Area, AreaData, Direction, GridExtent, GridPos, Room, RoomCompositor, RoomSize, TransitionOutcome,
    DEFAULT_TRANSITION_MS, NUM_ROOM_LAYERS,
};
use pearl_engine::assets::{read_area_data, write_area_data, AssetError};
use pearl_engine::foundation::math::Vec2;
use pearl_engine::render::texture_registry::TextureInfo;
use pearl_engine::render::{PoolKind, RenderError, RenderObjects};

#[derive(Default)]
struct CountingCompositor {
    stitches: Vec<(usize, usize)>,
}

impl RoomCompositor for CountingCompositor {
    fn stitch_room(&mut self, room: &Room, slot: usize) -> Result<(), RenderError> {
        self.stitches.push((room.id, slot));
        Ok(())
    }
}

/// 2x2 grid of medium rooms, serialized and parsed back like a file on disk
fn two_by_two_area_file() -> Vec<u8> {
    let size = RoomSize::Medium;
    let rooms = (0..4)
        .map(|id| Room {
            id,
            position: GridPos::new((id % 2) as i32, (id / 2) as i32),
            size,
            layers: [vec![id as u32 + 1; size.tile_count()], vec![0; size.tile_count()]],
            walls: Vec::new(),
        })
        .collect();
    write_area_data(&AreaData {
        extent: GridExtent { min: GridPos::new(0, 0), max: GridPos::new(1, 1) },
        room_size: size,
        rooms,
    })
}

fn render_objects(slots: usize) -> RenderObjects {
    let mut objects = RenderObjects::with_capacities([64, 16, 16], 32);
    objects
        .textures_mut()
        .register(TextureInfo::room_atlas((slots * NUM_ROOM_LAYERS) as u32, [640, 400]));
    objects
}

fn loaded_area(slots: usize) -> (Area, RenderObjects, CountingCompositor) {
    let data = read_area_data(&two_by_two_area_file()).unwrap();
    let mut area = Area::from_data(data, slots, DEFAULT_TRANSITION_MS);
    let mut objects = render_objects(slots);
    let mut compositor = CountingCompositor::default();
    area.reset_render_state(0, &mut objects, &mut compositor).unwrap();
    (area, objects, compositor)
}

/// Poll the camera the way the frame loop does until scrolling stops
fn settle(area: &mut Area, mut now_ms: u64, step_ms: u64) -> (Vec2, u64) {
    for _ in 0..16 {
        area.advance_if_complete(now_ms);
        if !area.is_scrolling() {
            return (area.camera_position(now_ms), now_ms);
        }
        now_ms += step_ms;
    }
    panic!("transition never completed");
}

fn assert_slots_bijective(area: &Area) {
    let slots = area.render_state().slots();
    assert!(slots.is_consistent());
    for room in area.rooms() {
        if let Some(slot) = slots.slot_of(room.id) {
            assert_eq!(slots.room_in(slot), Some(room.id));
        }
    }
}

#[test]
fn test_scroll_east_composes_new_slot() {
    let (mut area, mut objects, mut compositor) = loaded_area(2);
    assert_eq!(compositor.stitches, vec![(0, 0)]);
    assert_eq!(area.camera_position(0), Vec2::zeros());

    let outcome = area.set_next_room(Direction::East, 500, &mut objects, &mut compositor).unwrap();
    assert_eq!(outcome, TransitionOutcome::CacheMiss { slot: 1 });
    assert!(outcome.composed());
    assert_eq!(area.render_state().next_slot(), 1);
    assert_eq!(compositor.stitches, vec![(0, 0), (1, 1)]);
    assert!(area.is_scrolling());
    assert_slots_bijective(&area);

    let (camera, _) = settle(&mut area, 500 + DEFAULT_TRANSITION_MS, DEFAULT_TRANSITION_MS);
    assert_eq!(camera, area.room(1).unwrap().world_position());
    assert_eq!(camera, Vec2::new(24.0, 0.0));
    assert!(!area.is_scrolling());
    assert_slots_bijective(&area);
}

#[test]
fn test_scroll_back_reuses_cached_room() {
    let (mut area, mut objects, mut compositor) = loaded_area(2);
    area.set_next_room(Direction::East, 0, &mut objects, &mut compositor).unwrap();
    let (_, now) = settle(&mut area, DEFAULT_TRANSITION_MS, DEFAULT_TRANSITION_MS);
    let stitched = compositor.stitches.len();
    let quads_before = objects.pool(PoolKind::Main).active_count();

    let outcome = area.set_next_room(Direction::West, now, &mut objects, &mut compositor).unwrap();
    assert_eq!(outcome, TransitionOutcome::CacheHit { slot: 0 });
    assert!(!outcome.composed());
    assert_eq!(compositor.stitches.len(), stitched);
    assert_eq!(objects.pool(PoolKind::Main).active_count(), quads_before);
    assert_slots_bijective(&area);

    let (camera, _) = settle(&mut area, now + DEFAULT_TRANSITION_MS, DEFAULT_TRANSITION_MS);
    assert_eq!(camera, Vec2::zeros());
}

#[test]
fn test_camera_lands_exactly_for_coarse_polling() {
    let (mut area, mut objects, mut compositor) = loaded_area(2);
    area.set_next_room(Direction::South, 0, &mut objects, &mut compositor).unwrap();

    let midway = area.camera_position(DEFAULT_TRANSITION_MS / 2);
    assert!(midway.y > 0.0 && midway.y < 15.0);
    assert_eq!(midway.x, 0.0);
    assert!(area.is_scrolling());

    let (camera, _) = settle(&mut area, 3 * DEFAULT_TRANSITION_MS, 3 * DEFAULT_TRANSITION_MS);
    assert_eq!(camera, Vec2::new(0.0, 15.0));
}

#[test]
fn test_square_tour_keeps_slots_consistent() {
    let (mut area, mut objects, mut compositor) = loaded_area(2);
    let mut now = 0;
    for direction in [Direction::East, Direction::South, Direction::West, Direction::North] {
        let outcome = area.set_next_room(direction, now, &mut objects, &mut compositor).unwrap();
        assert!(outcome.started());
        assert_slots_bijective(&area);
        now = settle(&mut area, now + DEFAULT_TRANSITION_MS, DEFAULT_TRANSITION_MS).1;
    }
    assert_eq!(area.current_room_index(), 0);
    // start, then rooms 1, 3, 2 and 0 again once evicted with only two slots
    assert_eq!(compositor.stitches.len(), 5);
    assert_eq!(area.camera_position(now), Vec2::zeros());
}

#[test]
fn test_release_frees_room_quads() {
    let (mut area, mut objects, _) = loaded_area(2);
    assert_eq!(objects.pool(PoolKind::Main).active_count(), NUM_ROOM_LAYERS);
    area.release_render_state(&mut objects);
    assert_eq!(objects.pool(PoolKind::Main).active_count(), 0);
    assert!(objects.is_empty());
}

#[test]
fn test_corrupt_area_label_rejected() {
    let mut bytes = two_by_two_area_file();
    bytes[..4].copy_from_slice(b"XXX\0");
    assert!(matches!(read_area_data(&bytes), Err(AssetError::BadLabel { .. })));
}
