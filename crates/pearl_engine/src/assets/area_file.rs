//! FGA area files

use super::reader::{ByteReader, ByteWriter};
use super::{AssetError, AssetResult};
use crate::area::{AreaData, GridExtent, GridPos, Room, RoomSize, NUM_ROOM_LAYERS};
use crate::foundation::math::Rect;

/// Label opening every area file
pub const AREA_LABEL: [u8; 4] = *b"FGA\0";

/// Largest grid an area may span
pub const MAX_AREA_CELLS: u64 = 1 << 16;

const WALL_SIZE: usize = 4 * 8;

/// Parse an area file held in memory
pub fn read_area_data(bytes: &[u8]) -> AssetResult<AreaData> {
    let mut reader = ByteReader::new(bytes);
    reader.expect_label(AREA_LABEL)?;

    let extent = GridExtent {
        min: GridPos::new(reader.i32()?, reader.i32()?),
        max: GridPos::new(reader.i32()?, reader.i32()?),
    };
    if !extent.is_valid() {
        return Err(AssetError::InvalidData(format!(
            "area extent {:?}..{:?} is empty",
            extent.min, extent.max
        )));
    }
    if extent.cell_count() > MAX_AREA_CELLS {
        return Err(AssetError::TooLarge { what: "area extent", value: extent.cell_count() });
    }

    let room_size = RoomSize::from_u32(reader.u32()?)?;
    let tiles_per_room = room_size.tile_count() * NUM_ROOM_LAYERS;
    let room_count = reader.count("room count", 8 + tiles_per_room * 4 + 4)?;

    let mut occupied = vec![false; extent.width() * extent.height()];
    let mut rooms = Vec::with_capacity(room_count);
    for id in 0..room_count {
        let position = GridPos::new(reader.i32()?, reader.i32()?);
        let Some(cell) = extent.index_of(position) else {
            return Err(AssetError::InvalidData(format!(
                "room {} at ({}, {}) lies outside the area extent",
                id, position.x, position.y
            )));
        };
        if std::mem::replace(&mut occupied[cell], true) {
            return Err(AssetError::InvalidData(format!(
                "room {} duplicates grid position ({}, {})",
                id, position.x, position.y
            )));
        }

        let mut layers: [Vec<u32>; NUM_ROOM_LAYERS] = Default::default();
        for layer in &mut layers {
            *layer = (0..room_size.tile_count())
                .map(|_| reader.u32())
                .collect::<AssetResult<_>>()?;
        }

        let wall_count = reader.count("wall count", WALL_SIZE)?;
        let walls = (0..wall_count)
            .map(|_| -> AssetResult<Rect<f64>> {
                Ok(Rect::new(reader.f64()?, reader.f64()?, reader.f64()?, reader.f64()?))
            })
            .collect::<AssetResult<Vec<_>>>()?;

        rooms.push(Room { id, position, size: room_size, layers, walls });
    }

    if reader.remaining() > 0 {
        log::warn!("Area file has {} trailing bytes", reader.remaining());
    }
    log::debug!("Parsed area with {} rooms of size {:?}", rooms.len(), room_size);

    Ok(AreaData { extent, room_size, rooms })
}

/// Serialize an area into the FGA layout
#[allow(clippy::cast_possible_truncation)]
pub fn write_area_data(area: &AreaData) -> Vec<u8> {
    let mut writer = ByteWriter::default();
    writer
        .label(AREA_LABEL)
        .i32(area.extent.min.x)
        .i32(area.extent.min.y)
        .i32(area.extent.max.x)
        .i32(area.extent.max.y)
        .u32(area.room_size.as_u32())
        .u32(area.rooms.len() as u32);

    for room in &area.rooms {
        writer.i32(room.position.x).i32(room.position.y);
        for layer in &room.layers {
            for &tile in layer {
                writer.u32(tile);
            }
        }
        writer.u32(room.walls.len() as u32);
        for wall in &room.walls {
            writer.f64(wall.x).f64(wall.y).f64(wall.w).f64(wall.h);
        }
    }
    writer.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_area() -> AreaData {
        let tiles = RoomSize::Small.tile_count();
        let room = |id: usize, x: i32, y: i32| Room {
            id,
            position: GridPos::new(x, y),
            size: RoomSize::Small,
            layers: [vec![id as u32; tiles], vec![0; tiles]],
            walls: vec![Rect::new(0.0, 0.0, 16.0, 1.0)],
        };
        AreaData {
            extent: GridExtent { min: GridPos::new(0, 0), max: GridPos::new(1, 0) },
            room_size: RoomSize::Small,
            rooms: vec![room(0, 0, 0), room(1, 1, 0)],
        }
    }

    #[test]
    fn test_written_area_parses_back() {
        let area = sample_area();
        let parsed = read_area_data(&write_area_data(&area)).unwrap();
        assert_eq!(parsed.rooms, area.rooms);
        assert_eq!(parsed.extent, area.extent);
    }

    #[test]
    fn test_bad_label_rejected() {
        let mut bytes = write_area_data(&sample_area());
        bytes[..4].copy_from_slice(b"XXX\0");
        assert!(matches!(read_area_data(&bytes), Err(AssetError::BadLabel { .. })));
    }

    #[test]
    fn test_invalid_room_size_rejected() {
        let mut bytes = write_area_data(&sample_area());
        bytes[20..24].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(read_area_data(&bytes), Err(AssetError::InvalidRoomSize(7))));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let bytes = write_area_data(&sample_area());
        let truncated = &bytes[..bytes.len() - 5];
        assert!(read_area_data(truncated).is_err());
    }

    #[test]
    fn test_duplicate_position_rejected() {
        let mut area = sample_area();
        area.rooms[1].position = GridPos::new(0, 0);
        let bytes = write_area_data(&area);
        assert!(matches!(read_area_data(&bytes), Err(AssetError::InvalidData(_))));
    }

    #[test]
    fn test_room_outside_extent_rejected() {
        let mut area = sample_area();
        area.rooms[1].position = GridPos::new(5, 0);
        let bytes = write_area_data(&area);
        assert!(matches!(read_area_data(&bytes), Err(AssetError::InvalidData(_))));
    }

    fn header(min: GridPos, max: GridPos) -> Vec<u8> {
        let mut bytes = AREA_LABEL.to_vec();
        for value in [min.x, min.y, max.x, max.y] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes
    }

    #[test]
    fn test_extent_spanning_i32_range_rejected() {
        let bytes = header(GridPos::new(i32::MIN, 0), GridPos::new(i32::MAX, 0));
        assert!(matches!(
            read_area_data(&bytes),
            Err(AssetError::TooLarge { what: "area extent", value }) if value == 1 << 32
        ));
    }

    #[test]
    fn test_huge_extent_rejected_before_allocating() {
        let bytes = header(GridPos::new(0, 0), GridPos::new(1_000_000, 1_000_000));
        assert!(matches!(read_area_data(&bytes), Err(AssetError::TooLarge { what: "area extent", .. })));
    }

    #[test]
    fn test_largest_allowed_extent_parses() {
        let bytes = header(GridPos::new(0, 0), GridPos::new(255, 255));
        let parsed = read_area_data(&bytes).unwrap();
        assert!(parsed.rooms.is_empty());
        assert_eq!(parsed.extent.cell_count(), MAX_AREA_CELLS);
    }
}
