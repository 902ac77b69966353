//! Finding the browser driver executable.
//!
//! An explicitly configured path must exist. Without one, every directory of
//! `PATH` is searched for the driver. Not finding it is fatal for the send.

use crate::errors::{Error, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

#[cfg(windows)]
const DRIVER_NAMES: &[&str] = &["chromedriver.exe"];
#[cfg(not(windows))]
const DRIVER_NAMES: &[&str] = &["chromedriver"];

/// Resolves the driver executable from the configured path or the process `PATH`.
///
/// # Errors
/// Returns [`Error::RasterizerUnavailable`] if nothing usable is found.
pub fn find_driver(configured: Option<&Path>) -> Result<PathBuf> {
    let search_path = std::env::var_os("PATH").unwrap_or_default();
    find_driver_in(configured, &search_path)
}

/// Same as [`find_driver`] against an explicit `PATH`-style value.
pub fn find_driver_in(configured: Option<&Path>, search_path: &OsStr) -> Result<PathBuf> {
    if let Some(path) = configured {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(Error::RasterizerUnavailable {
                message: format!("configured driver not found at {}", path.display()),
            })
        };
    }

    std::env::split_paths(search_path)
        .flat_map(|dir| DRIVER_NAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| Error::RasterizerUnavailable {
            message: "chromedriver not found on PATH; set CHROMEDRIVER_PATH".to_string(),
        })
}
