//! Foundation module - Core utilities and types
//!
//! - Math types and operations
//! - Time management and the fixed simulation step
//! - Logging setup

pub mod math;
pub mod time;
pub mod logging;
