//! Synchronization state

pub mod sync;

pub use sync::{Fence, Semaphore, TimelineSemaphore};
