//! Module library discovery
//!
//! The installation directory is probed once per process and cached. Lookup
//! tries the exact platform file name in each search root before walking the
//! root (bounded depth) for nested layouts such as bundles.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

/// Overrides the installation directory when set
pub const INSTALL_DIR_ENV: &str = "UGEN_BRIDGE_PATH";

/// Installation directory for module libraries
///
/// `UGEN_BRIDGE_PATH` when set, otherwise `<data dir>/ugen_bridge/modules`.
/// Probed on first call only.
pub fn install_dir() -> Option<&'static Path> {
    static INSTALL_DIR: OnceLock<Option<PathBuf>> = OnceLock::new();

    INSTALL_DIR
        .get_or_init(|| {
            let dir = probe_install_dir();
            match &dir {
                Some(dir) => tracing::debug!("Module install dir: {}", dir.display()),
                None => tracing::warn!("No module install dir could be determined"),
            }
            dir
        })
        .as_deref()
}

fn probe_install_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(INSTALL_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    dirs::data_dir().map(|data| data.join("ugen_bridge").join("modules"))
}

/// Default search roots for the current platform
pub fn get_default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(dir) = install_dir() {
        paths.push(dir.to_path_buf());
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/local/lib/ugen_bridge"));
        paths.push(PathBuf::from("/usr/lib/ugen_bridge"));
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/Library/Application Support/ugen_bridge/modules"));
    }

    if let Ok(current_dir) = std::env::current_dir() {
        paths.push(current_dir.join("modules"));
    }

    paths
}

/// Candidate file names for a module name, most specific first
///
/// `sine` and `libsine` both resolve to `libsine.so` on Linux.
pub fn library_file_names(name: &str) -> Vec<String> {
    let mut names = Vec::new();
    let has_suffix = !DLL_SUFFIX.is_empty() && name.ends_with(DLL_SUFFIX);

    if has_suffix {
        names.push(name.to_string());
    } else {
        names.push(format!("{name}{DLL_SUFFIX}"));
        if !DLL_PREFIX.is_empty() && !name.starts_with(DLL_PREFIX) {
            names.push(format!("{DLL_PREFIX}{name}{DLL_SUFFIX}"));
        }
    }

    names
}

/// Locate a module library, returning every location tried on failure
pub fn find_library(
    name: &str,
    search_paths: &[PathBuf],
    max_depth: usize,
) -> Result<PathBuf, Vec<PathBuf>> {
    let candidates = library_file_names(name);
    let mut searched = Vec::new();

    // An explicit path skips the search roots entirely
    let direct = Path::new(name);
    if direct.components().count() > 1 {
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }
        searched.push(direct.to_path_buf());
        return Err(searched);
    }

    for root in search_paths {
        for candidate in &candidates {
            let path = root.join(candidate);
            if path.is_file() {
                return Ok(path);
            }
            searched.push(path);
        }
    }

    for root in search_paths.iter().filter(|root| root.is_dir()) {
        let found = WalkDir::new(root)
            .max_depth(max_depth)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .find(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|file_name| candidates.iter().any(|c| c == file_name))
            });

        if let Some(entry) = found {
            return Ok(entry.into_path());
        }
    }

    Err(searched)
}
