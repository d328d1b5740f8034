//! Small file I/O helpers shared by the wrapper tasks.
//!
//! - **Atomic replace**: write to a sibling temp file, then rename over the
//!   target, so watchers never observe a half-written file
//! - **Content hashing**: BLAKE3 digests for change detection

pub mod atomic;
pub mod hash;

pub use atomic::{atomic_write, atomic_write_private, remove_if_exists};
pub use hash::compute_hash;
