//! Platform Directories

use bridge_traits::error::{BridgeError, Result};
use std::path::PathBuf;

/// Directory name used under the platform cache directory.
pub const APP_DIR_NAME: &str = "rangecache";

/// Default cache directory for the current platform.
///
/// - Linux: `$XDG_CACHE_HOME/rangecache` or `~/.cache/rangecache`
/// - macOS: `~/Library/Caches/rangecache`
/// - Windows: `{FOLDERID_LocalAppData}\rangecache`
///
/// The directory is not created here; the cache creates it on initialization.
pub fn default_cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
        .ok_or_else(|| {
            BridgeError::NotAvailable("no cache or home directory on this platform".to_string())
        })?;
    Ok(base.join(APP_DIR_NAME))
}
