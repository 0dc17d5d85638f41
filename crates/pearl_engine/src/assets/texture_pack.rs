//! FGT texture packs and their images

use std::path::Path;

use super::reader::ByteReader;
use super::{AssetError, AssetResult};
use crate::area::TILE_SIZE_PX;
use crate::render::texture_registry::{Animation, TextureFlags, TextureInfo};

/// Label opening every texture pack
pub const TEXTURE_PACK_LABEL: [u8; 4] = *b"FGT\0";

/// Longest texture id a pack may store
pub const MAX_TEXTURE_ID_LEN: usize = 256;

// Largest cell grid and cell size accepted from a pack
const MAX_CELLS: u32 = 2048;
const MAX_CELL_EXTENT: u32 = 4096;

/// Largest decoded texture, all layers together
pub const MAX_TEXTURE_BYTES: u64 = 256 << 20;

/// RGBA8 byte size of `layers` images of `width` by `height`
pub fn rgba_byte_len(width: u32, height: u32, layers: u32) -> u64 {
    u64::from(width) * u64::from(height) * u64::from(layers) * 4
}

/// Parse a texture pack held in memory
pub fn read_texture_pack(bytes: &[u8]) -> AssetResult<Vec<TextureInfo>> {
    let mut reader = ByteReader::new(bytes);
    reader.expect_label(TEXTURE_PACK_LABEL)?;

    let count = reader.count("texture count", 4 + 4 + 16 + 4)?;
    let mut textures = Vec::with_capacity(count);
    for _ in 0..count {
        let id = reader.len_string(MAX_TEXTURE_ID_LEN)?;
        let flags = TextureFlags::from_bits_truncate(reader.u32()?);
        let cell_grid = [reader.u32()?, reader.u32()?];
        let cell_extent = [reader.u32()?, reader.u32()?];

        let cells = cell_grid[0].checked_mul(cell_grid[1]).unwrap_or(u32::MAX);
        if cells == 0 || cells > MAX_CELLS {
            return Err(AssetError::TooLarge { what: "cell count", value: u64::from(cells) });
        }
        if cell_extent.iter().any(|&e| e == 0 || e > MAX_CELL_EXTENT) {
            return Err(AssetError::InvalidData(format!(
                "texture '{}' has cell extent {:?}",
                id, cell_extent
            )));
        }
        if flags.contains(TextureFlags::TILEMAP) && cell_extent != [TILE_SIZE_PX; 2] {
            return Err(AssetError::InvalidData(format!(
                "tilemap '{}' has {}x{} cells, tiles are {}x{}",
                id, cell_extent[0], cell_extent[1], TILE_SIZE_PX, TILE_SIZE_PX
            )));
        }
        let byte_len = rgba_byte_len(cell_extent[0], cell_extent[1], cells);
        if byte_len > MAX_TEXTURE_BYTES {
            return Err(AssetError::TooLarge { what: "texture size", value: byte_len });
        }

        let animation_count = reader.count("animation count", 12)?;
        let mut animations = Vec::with_capacity(animation_count.max(1));
        for _ in 0..animation_count {
            let animation = Animation {
                start_cell: reader.u32()?,
                frame_count: reader.u32()?,
                fps: reader.u32()?,
            };
            if animation.frame_count == 0
                || animation.start_cell.saturating_add(animation.frame_count) > cells
            {
                return Err(AssetError::InvalidData(format!(
                    "texture '{}' animation {:?} exceeds its {} cells",
                    id, animation, cells
                )));
            }
            animations.push(animation);
        }
        if animations.is_empty() {
            animations.push(Animation::STILL);
        }

        textures.push(TextureInfo { id, flags, cell_grid, cell_extent, animations });
    }

    log::debug!("Parsed texture pack with {} textures", textures.len());
    Ok(textures)
}

/// RGBA8 pixels of a texture with every cell in its own array layer
#[derive(Debug, Clone)]
pub struct TexturePixels {
    /// Width of one layer
    pub width: u32,
    /// Height of one layer
    pub height: u32,
    /// Number of layers
    pub layers: u32,
    /// Tightly packed layers, one after another
    pub data: Vec<u8>,
}

impl TexturePixels {
    /// Checkerboard used when an image is missing or unreadable
    pub fn checkerboard(width: u32, height: u32, layers: u32) -> Self {
        let mut data = Vec::with_capacity(capacity_hint(rgba_byte_len(width, height, layers)));
        for _ in 0..layers {
            for y in 0..height {
                for x in 0..width {
                    let color: [u8; 4] = if ((x / 4) + (y / 4)) % 2 == 0 { [255, 0, 255, 255] } else { [0, 0, 0, 255] };
                    data.extend_from_slice(&color);
                }
            }
        }
        Self { width, height, layers, data }
    }

    /// Split an atlas image into one layer per cell
    pub fn from_atlas(atlas: &image::RgbaImage, info: &TextureInfo) -> Self {
        let [cell_w, cell_h] = info.cell_extent;
        let [columns, _] = info.cell_grid;
        let mut data = Vec::with_capacity(capacity_hint(rgba_byte_len(cell_w, cell_h, info.cell_count())));
        for cell in 0..info.cell_count() {
            let origin_x = (cell % columns) * cell_w;
            let origin_y = (cell / columns) * cell_h;
            for y in 0..cell_h {
                for x in 0..cell_w {
                    let pixel = atlas
                        .get_pixel_checked(origin_x + x, origin_y + y)
                        .map_or([0, 0, 0, 0], |p| p.0);
                    data.extend_from_slice(&pixel);
                }
            }
        }
        Self { width: cell_w, height: cell_h, layers: info.cell_count(), data }
    }
}

fn capacity_hint(byte_len: u64) -> usize {
    usize::try_from(byte_len.min(MAX_TEXTURE_BYTES)).unwrap_or(0)
}

/// Load `<asset_dir>/<id>.png`, falling back to a checkerboard
pub fn load_texture_pixels(asset_dir: &Path, info: &TextureInfo) -> TexturePixels {
    let path = asset_dir.join(format!("{}.png", info.id));
    match image::open(&path) {
        Ok(image) => {
            let atlas = image.to_rgba8();
            let expected = (info.cell_grid[0] * info.cell_extent[0], info.cell_grid[1] * info.cell_extent[1]);
            if atlas.dimensions() != expected {
                log::warn!(
                    "Texture '{}' is {:?}, expected {:?}; cells outside the image stay transparent",
                    info.id,
                    atlas.dimensions(),
                    expected
                );
            }
            TexturePixels::from_atlas(&atlas, info)
        }
        Err(e) => {
            log::warn!("Could not load {}: {}; using checkerboard", path.display(), e);
            TexturePixels::checkerboard(info.cell_extent[0], info.cell_extent[1], info.cell_count())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(entries: &[(&str, u32, [u32; 2], Vec<[u32; 3]>)]) -> Vec<u8> {
        let mut bytes = TEXTURE_PACK_LABEL.to_vec();
        bytes.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for (id, flags, grid, anims) in entries {
            let mut raw = id.as_bytes().to_vec();
            raw.push(0);
            bytes.extend_from_slice(&(raw.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&raw);
            for value in [*flags, grid[0], grid[1], 16, 16, anims.len() as u32] {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
            for anim in anims {
                for value in anim {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        bytes
    }

    #[test]
    fn test_pack_parses_ids_and_animations() {
        let bytes = pack(&[("tiles", 3, [8, 8], vec![]), ("player", 0, [4, 1], vec![[0, 4, 8]])]);
        let textures = read_texture_pack(&bytes).unwrap();
        assert_eq!(textures.len(), 2);
        assert_eq!(textures[0].id, "tiles");
        assert!(textures[0].flags.contains(TextureFlags::TILEMAP | TextureFlags::PRE_LOADED));
        assert_eq!(textures[0].animations, vec![Animation::STILL]);
        assert_eq!(textures[1].animations[0], Animation { start_cell: 0, frame_count: 4, fps: 8 });
    }

    #[test]
    fn test_tilemap_with_wrong_cell_size_rejected() {
        let mut bytes = single_texture([8, 8], [32, 32]);
        bytes[16..20].copy_from_slice(&TextureFlags::TILEMAP.bits().to_le_bytes());
        assert!(matches!(read_texture_pack(&bytes), Err(AssetError::InvalidData(_))));

        let mut bytes = single_texture([8, 8], [16, 16]);
        bytes[16..20].copy_from_slice(&TextureFlags::TILEMAP.bits().to_le_bytes());
        assert!(read_texture_pack(&bytes).unwrap()[0].flags.contains(TextureFlags::TILEMAP));
    }

    #[test]
    fn test_animation_past_last_cell_rejected() {
        let bytes = pack(&[("player", 0, [4, 1], vec![[2, 4, 8]])]);
        assert!(matches!(read_texture_pack(&bytes), Err(AssetError::InvalidData(_))));
    }

    #[test]
    fn test_overlong_id_rejected() {
        let mut bytes = TEXTURE_PACK_LABEL.to_vec();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&300u32.to_le_bytes());
        bytes.extend(std::iter::repeat(b'a').take(300 + 28));
        assert!(matches!(read_texture_pack(&bytes), Err(AssetError::TooLarge { .. })));
    }

    fn single_texture(grid: [u32; 2], extent: [u32; 2]) -> Vec<u8> {
        let mut bytes = TEXTURE_PACK_LABEL.to_vec();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(b"big\0");
        for value in [0, grid[0], grid[1], extent[0], extent[1], 0] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_texture_larger_than_limit_rejected() {
        let bytes = single_texture([64, 32], [4096, 4096]);
        assert!(matches!(
            read_texture_pack(&bytes),
            Err(AssetError::TooLarge { what: "texture size", value }) if value == rgba_byte_len(4096, 4096, 2048)
        ));
    }

    #[test]
    fn test_texture_at_limit_accepted() {
        let bytes = single_texture([4, 4], [2048, 2048]);
        let textures = read_texture_pack(&bytes).unwrap();
        assert_eq!(rgba_byte_len(2048, 2048, textures[0].cell_count()), MAX_TEXTURE_BYTES);
    }

    #[test]
    fn test_atlas_split_into_layers() {
        let info = TextureInfo {
            id: "two".to_string(),
            flags: TextureFlags::empty(),
            cell_grid: [2, 1],
            cell_extent: [1, 1],
            animations: vec![Animation::STILL],
        };
        let mut atlas = image::RgbaImage::new(2, 1);
        atlas.put_pixel(0, 0, image::Rgba([1, 2, 3, 4]));
        atlas.put_pixel(1, 0, image::Rgba([5, 6, 7, 8]));
        let pixels = TexturePixels::from_atlas(&atlas, &info);
        assert_eq!(pixels.layers, 2);
        assert_eq!(pixels.data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_missing_image_falls_back_to_checkerboard() {
        let info = TextureInfo::missing();
        let pixels = load_texture_pixels(Path::new("/nonexistent"), &info);
        assert_eq!(pixels.data.len(), (16 * 16 * 4) as usize);
        assert_eq!(&pixels.data[..4], &[255, 0, 255, 255]);
    }
}
