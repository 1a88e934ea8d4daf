//! Code search and search/replace over a project tree.

pub mod replace;
pub mod search;

pub use replace::{ReplaceOptions, ReplaceSettings, run_replace};
pub use search::{PathMode, SearchOptions, SearchSettings, run_search};

/// Default per-file size limit in bytes.
pub const DEFAULT_MAX_SIZE: u64 = 2_000_000;

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::Path;

    use rtools_shared::{ConfigLoader, ConfigPaths, LoadedConfig};
    use serde_json::Value;

    pub fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write");
    }

    /// Config rooted at `root` with the given global overrides and no files on disk.
    pub fn config(root: &Path, overrides: Value) -> LoadedConfig {
        let paths = ConfigPaths::at(root.join(".no-configs"));
        ConfigLoader::new(&paths)
            .cwd(root)
            .project(Some(root.to_path_buf()))
            .overrides(overrides)
            .load()
    }
}
