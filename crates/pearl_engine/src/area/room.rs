//! Rooms and the grid they sit on

use nalgebra::Vector2;

use crate::assets::AssetError;
use crate::foundation::math::{Rect, Vec2};

/// Number of tile layers per room (background, foreground)
pub const NUM_ROOM_LAYERS: usize = 2;

/// Edge length of one tile in pixels
pub const TILE_SIZE_PX: u32 = 16;

/// Integer position of a room on the area grid
pub type GridPos = Vector2<i32>;

/// Physical extent class shared by every room of an area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomSize {
    /// 16×10 tiles
    Small,
    /// 24×15 tiles
    Medium,
    /// 32×20 tiles
    Large,
    /// 40×25 tiles
    ExtraLarge,
}

impl RoomSize {
    /// Largest size class; bounds every per-room GPU allocation
    pub const LARGEST: Self = Self::ExtraLarge;

    /// Decode the size class stored in area files
    pub fn from_u32(value: u32) -> Result<Self, AssetError> {
        match value {
            0 => Ok(Self::Small),
            1 => Ok(Self::Medium),
            2 => Ok(Self::Large),
            3 => Ok(Self::ExtraLarge),
            other => Err(AssetError::InvalidRoomSize(other)),
        }
    }

    /// Value stored in area files
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Extent in tiles as (width, height)
    pub const fn tile_extent(self) -> (u32, u32) {
        match self {
            Self::Small => (16, 10),
            Self::Medium => (24, 15),
            Self::Large => (32, 20),
            Self::ExtraLarge => (40, 25),
        }
    }

    /// Number of tiles in one layer
    pub const fn tile_count(self) -> usize {
        let (w, h) = self.tile_extent();
        (w * h) as usize
    }

    /// Extent in pixels as (width, height)
    pub const fn pixel_extent(self) -> (u32, u32) {
        let (w, h) = self.tile_extent();
        (w * TILE_SIZE_PX, h * TILE_SIZE_PX)
    }

    /// Extent in world units; one tile is one unit
    #[allow(clippy::cast_precision_loss)]
    pub fn world_extent(self) -> Vec2 {
        let (w, h) = self.tile_extent();
        Vec2::new(w as f32, h as f32)
    }
}

/// Direction of travel between neighbouring rooms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// No movement
    None,
    /// Towards negative y
    North,
    /// Towards positive x
    East,
    /// Towards positive y
    South,
    /// Towards negative x
    West,
}

impl Direction {
    /// Grid offset of one step in this direction
    pub fn offset(self) -> GridPos {
        match self {
            Self::None => GridPos::new(0, 0),
            Self::North => GridPos::new(0, -1),
            Self::East => GridPos::new(1, 0),
            Self::South => GridPos::new(0, 1),
            Self::West => GridPos::new(-1, 0),
        }
    }
}

/// One screen of tile geometry plus collision boxes
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    /// Index into the owning area's room list
    pub id: usize,
    /// Grid position
    pub position: GridPos,
    /// Size class
    pub size: RoomSize,
    /// Row-major tile indices per layer
    pub layers: [Vec<u32>; NUM_ROOM_LAYERS],
    /// Wall boxes in room-local tile units
    pub walls: Vec<Rect<f64>>,
}

impl Room {
    /// Top-left corner in world units
    #[allow(clippy::cast_precision_loss)]
    pub fn world_position(&self) -> Vec2 {
        let extent = self.size.world_extent();
        Vec2::new(self.position.x as f32 * extent.x, self.position.y as f32 * extent.y)
    }

    /// World-space bounds of the room
    pub fn world_bounds(&self) -> Rect<f32> {
        let origin = self.world_position();
        let extent = self.size.world_extent();
        Rect::new(origin.x, origin.y, extent.x, extent.y)
    }
}

/// Inclusive rectangle of grid positions an area may occupy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridExtent {
    /// Smallest corner
    pub min: GridPos,
    /// Largest corner, inclusive
    pub max: GridPos,
}

impl GridExtent {
    /// Whether the extent describes at least one cell
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    /// Number of columns
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn width(&self) -> usize {
        (i64::from(self.max.x) - i64::from(self.min.x) + 1).max(0) as usize
    }

    /// Number of rows
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn height(&self) -> usize {
        (i64::from(self.max.y) - i64::from(self.min.y) + 1).max(0) as usize
    }

    /// Number of cells, computed without overflow for any pair of corners
    #[allow(clippy::cast_sign_loss)]
    pub fn cell_count(&self) -> u64 {
        if !self.is_valid() {
            return 0;
        }
        let columns = (i64::from(self.max.x) - i64::from(self.min.x) + 1) as u64;
        let rows = (i64::from(self.max.y) - i64::from(self.min.y) + 1) as u64;
        columns * rows
    }

    /// Dense index of a grid position, `None` outside the extent
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn index_of(&self, pos: GridPos) -> Option<usize> {
        if pos.x < self.min.x || pos.x > self.max.x || pos.y < self.min.y || pos.y > self.max.y {
            return None;
        }
        let column = (i64::from(pos.x) - i64::from(self.min.x)) as usize;
        let row = (i64::from(pos.y) - i64::from(self.min.y)) as usize;
        Some(row * self.width() + column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_room_size_decoding() {
        assert_eq!(RoomSize::from_u32(1).unwrap(), RoomSize::Medium);
        assert_eq!(RoomSize::Medium.tile_extent(), (24, 15));
        assert_eq!(RoomSize::LARGEST.pixel_extent(), (640, 400));
        assert!(matches!(RoomSize::from_u32(4), Err(AssetError::InvalidRoomSize(4))));
    }

    #[test]
    fn test_world_position_scales_by_extent() {
        let room = Room {
            id: 3,
            position: GridPos::new(1, -2),
            size: RoomSize::Medium,
            layers: [vec![0; 360], vec![0; 360]],
            walls: Vec::new(),
        };
        assert_relative_eq!(room.world_position(), Vec2::new(24.0, -30.0));
    }

    #[test]
    fn test_grid_extent_indexing() {
        let extent = GridExtent { min: GridPos::new(-1, 0), max: GridPos::new(1, 1) };
        assert_eq!(extent.width(), 3);
        assert_eq!(extent.height(), 2);
        assert_eq!(extent.index_of(GridPos::new(-1, 0)), Some(0));
        assert_eq!(extent.index_of(GridPos::new(1, 1)), Some(5));
        assert_eq!(extent.index_of(GridPos::new(2, 0)), None);
        assert_eq!(extent.cell_count(), 6);
    }

    #[test]
    fn test_grid_extent_spanning_all_of_i32() {
        let extent = GridExtent { min: GridPos::new(i32::MIN, 0), max: GridPos::new(i32::MAX, 0) };
        assert_eq!(extent.cell_count(), 1 << 32);
        assert_eq!(extent.index_of(GridPos::new(i32::MIN, 0)), Some(0));
    }
}
