//! Compute stages

pub mod stitch;
pub mod matrices;

pub use stitch::TileStitchStage;
pub use matrices::{MatrixPushConstants, MatrixStage};
