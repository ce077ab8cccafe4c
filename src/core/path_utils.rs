/*
 * Resolution of the directories rubac works in: the data directory holding the
 * profile documents, the log directory, and the scratch directory for exclude
 * and restore lists.
 */
use directories::ProjectDirs;
use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "rubac";
pub const DATADIR_ENV: &str = "RUBAC_DATADIR";
pub const SYSTEM_DATA_DIR: &str = "/etc/rubac";
pub const SYSTEM_LOG_DIR: &str = "/var/log/rubac";

/*
 * Picks the data directory: an explicit `--datadir`, then `RUBAC_DATADIR`, then
 * the system directory when it is usable, and finally the per-user config
 * directory. The chosen directory is created if needed. Returns `None` only when
 * no candidate can be created.
 */
pub fn resolve_data_dir(cli: Option<&Path>) -> Option<PathBuf> {
    let env_dir = env::var_os(DATADIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    resolve_data_dir_from(cli, env_dir, Path::new(SYSTEM_DATA_DIR))
}

fn resolve_data_dir_from(cli: Option<&Path>, env_dir: Option<PathBuf>, system: &Path) -> Option<PathBuf> {
    if let Some(dir) = cli.map(Path::to_path_buf).or(env_dir) {
        return ensure_dir(&dir).then_some(dir);
    }
    if is_writable_dir(system) {
        return Some(system.to_path_buf());
    }
    user_config_dir(APP_NAME)
}

// Per-user config directory for `app_name`, created on demand.
pub fn user_config_dir(app_name: &str) -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", app_name)?;
    let dir = dirs.config_dir().to_path_buf();
    ensure_dir(&dir).then_some(dir)
}

pub fn resolve_log_dir(cli: Option<&str>, configured: &str) -> PathBuf {
    if let Some(dir) = cli.map(str::trim).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if !configured.trim().is_empty() {
        return PathBuf::from(configured.trim());
    }
    if running_as_root() {
        return PathBuf::from(SYSTEM_LOG_DIR);
    }
    work_dir()
}

// `<tmp>/rubac`; exclude lists, restore lists and non-root logs go here.
pub fn work_dir() -> PathBuf {
    env::temp_dir().join(APP_NAME)
}

fn ensure_dir(dir: &Path) -> bool {
    match fs::create_dir_all(dir) {
        Ok(()) => true,
        Err(e) => {
            log::error!("PathUtils: Failed to create directory {dir:?}: {e}");
            false
        }
    }
}

fn is_writable_dir(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(format!(".{APP_NAME}-probe-{}", std::process::id()));
    let writable = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&probe)
        .is_ok();
    if writable {
        let _ = fs::remove_file(&probe);
    }
    log::trace!("PathUtils: {dir:?} writable: {writable}");
    writable
}

#[cfg(unix)]
fn running_as_root() -> bool {
    use std::os::unix::fs::MetadataExt;
    // A process owns its own /proc entry.
    fs::metadata("/proc/self").is_ok_and(|m| m.uid() == 0)
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}
