//! File selection and text utilities shared by the rtools file tools.
//!
//! - [`glob`]: glob → regex translation (path-style and fnmatch-style)
//! - [`walk`]: pruned project walks honouring exclusions
//! - [`text`]: size-limited reads, binary sniffing
//! - [`diff`]: unified diff rendering

pub mod diff;
pub mod glob;
pub mod text;
pub mod walk;

pub use diff::unified_diff;
pub use glob::{Glob, GlobSet, normalize_globs};
pub use walk::{WalkOptions, glob_files, normalize_exts, rel_path, walk_files};
