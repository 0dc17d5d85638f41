//! Asset file formats
//!
//! The game ships three little-endian binary formats, each opening with a
//! four-byte label:
//!
//! - **FGA** area files: room grid, tile layers and walls
//! - **FGT** texture packs: atlas layout and animations per texture
//! - **FGE** entity records: stats and sprite of each entity kind
//!
//! Parsers take the whole file as a byte slice and never panic on malformed
//! input; every failure surfaces as an [`AssetError`].

mod reader;
pub mod area_file;
pub mod texture_pack;
pub mod entity_records;

pub use area_file::{read_area_data, write_area_data};
pub use texture_pack::{read_texture_pack, load_texture_pixels, TexturePixels};
pub use entity_records::{read_entity_records, EntityRecord};

use thiserror::Error;

/// Errors raised while loading asset files
#[derive(Error, Debug)]
pub enum AssetError {
    /// The file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The leading label does not name the expected format
    #[error("Bad file label: expected {expected:?}, found {found:?}")]
    BadLabel {
        /// Label of the format being parsed
        expected: [u8; 4],
        /// Label actually present
        found: [u8; 4],
    },

    /// Room size class outside the four known sizes
    #[error("Invalid room size type {0}")]
    InvalidRoomSize(u32),

    /// The file ended in the middle of a field
    #[error("Unexpected end of file at byte {offset}: needed {needed} more bytes")]
    UnexpectedEof {
        /// Offset where the read started
        offset: usize,
        /// Bytes the read required
        needed: usize,
    },

    /// A string field is not valid UTF-8 or exceeds its limit
    #[error("Invalid string at byte {offset}")]
    InvalidString {
        /// Offset of the string field
        offset: usize,
    },

    /// A count or length field is larger than the format allows
    #[error("{what} too large: {value}")]
    TooLarge {
        /// Which field
        what: &'static str,
        /// Value found in the file
        value: u64,
    },

    /// The decoded contents are inconsistent
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A texture image could not be decoded
    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type for asset loading
pub type AssetResult<T> = Result<T, AssetError>;
