//! Conflict detection, resolution and bookkeeping.

pub mod detector;
pub mod log;
pub mod merge;
pub mod resolver;

pub use detector::ConflictDetector;
pub use log::ConflictLog;
pub use merge::{Patch, StructuralMergeOptions};
pub use resolver::{
    BaseVersionSource, ConflictResolver, ConflictResolverBuilder, CustomResolver, ManualPrompt,
};
