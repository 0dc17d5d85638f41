//! FGE entity records

use super::reader::ByteReader;
use super::AssetResult;
use crate::foundation::math::Rect;

/// Label opening every entity record file
pub const ENTITY_LABEL: [u8; 4] = *b"FGE\0";

/// Size of each fixed string field
pub const ENTITY_STRING_LEN: usize = 32;

const RECORD_SIZE: usize = ENTITY_STRING_LEN * 3 + 4 * 8 + 4 + 4 + 8 + 4 * 4;

/// Stats and sprite of one entity kind
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Entity id
    pub id: String,
    /// Behaviour id
    pub ai_id: String,
    /// Collision box relative to the entity origin
    pub hitbox: Rect<f64>,
    /// Whether the entity survives leaving its room
    pub persistent: bool,
    /// Starting and maximum hit points
    pub max_hp: i32,
    /// Movement speed in world units per tick
    pub speed: f64,
    /// Texture id of the sprite
    pub texture_id: String,
    /// Sprite offset and extent in world units
    pub texture_dimensions: Rect<f32>,
}

/// Parse an entity record file held in memory
pub fn read_entity_records(bytes: &[u8]) -> AssetResult<Vec<EntityRecord>> {
    let mut reader = ByteReader::new(bytes);
    reader.expect_label(ENTITY_LABEL)?;

    let count = reader.count("entity count", RECORD_SIZE)?;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(EntityRecord {
            id: reader.fixed_string(ENTITY_STRING_LEN)?,
            ai_id: reader.fixed_string(ENTITY_STRING_LEN)?,
            hitbox: Rect::new(reader.f64()?, reader.f64()?, reader.f64()?, reader.f64()?),
            persistent: reader.u32()? != 0,
            max_hp: reader.i32()?,
            speed: reader.f64()?,
            texture_id: reader.fixed_string(ENTITY_STRING_LEN)?,
            texture_dimensions: Rect::new(reader.f32()?, reader.f32()?, reader.f32()?, reader.f32()?),
        });
    }

    log::debug!("Parsed {} entity records", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetError;

    fn fixed(s: &str) -> [u8; ENTITY_STRING_LEN] {
        let mut field = [0u8; ENTITY_STRING_LEN];
        field[..s.len()].copy_from_slice(s.as_bytes());
        field
    }

    fn player_record() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&fixed("player"));
        bytes.extend_from_slice(&fixed("input"));
        for v in [0.25f64, 0.5, 0.75, 0.5] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&6i32.to_le_bytes());
        bytes.extend_from_slice(&0.125f64.to_le_bytes());
        bytes.extend_from_slice(&fixed("player"));
        for v in [0.0f32, 0.0, 1.0, 1.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_record_fields_decoded() {
        let mut bytes = ENTITY_LABEL.to_vec();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend(player_record());
        let records = read_entity_records(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, "player");
        assert_eq!(record.ai_id, "input");
        assert!(record.persistent);
        assert_eq!(record.max_hp, 6);
        assert_eq!(record.hitbox, Rect::new(0.25, 0.5, 0.75, 0.5));
        assert_eq!(record.texture_dimensions, Rect::new(0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_record_size_matches_layout() {
        assert_eq!(player_record().len(), RECORD_SIZE);
    }

    #[test]
    fn test_count_larger_than_file_rejected() {
        let mut bytes = ENTITY_LABEL.to_vec();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend(player_record());
        assert!(matches!(read_entity_records(&bytes), Err(AssetError::TooLarge { .. })));
    }
}
