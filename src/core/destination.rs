/*
 * The backup destination root. A destination is only trusted once it carries the
 * `rubac.init` marker, which guards against writing backups into an unmounted
 * mount point. Client generations live under `<dest>/<profile>/<client>/`.
 */
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const INIT_MARKER_FILE_NAME: &str = "rubac.init";

#[derive(Debug)]
pub enum DestinationError {
    NotSet,
    Missing(PathBuf),
    NotInitialized(PathBuf),
    Io(PathBuf, io::Error),
}

impl std::fmt::Display for DestinationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationError::NotSet => write!(f, "backup destination not set"),
            DestinationError::Missing(p) => {
                write!(f, "backup destination {} not found", p.display())
            }
            DestinationError::NotInitialized(p) => write!(
                f,
                "backup destination {} is not initialised (missing {INIT_MARKER_FILE_NAME})",
                p.display()
            ),
            DestinationError::Io(p, e) => write!(f, "backup destination {}: {e}", p.display()),
        }
    }
}

impl std::error::Error for DestinationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DestinationError::Io(_, e) => Some(e),
            _ => None,
        }
    }
}

/*
 * Creates the destination tree and its marker. Re-initialising an existing
 * destination is harmless and only logged.
 */
pub fn initialize(dest: &Path) -> Result<(), DestinationError> {
    let marker = dest.join(INIT_MARKER_FILE_NAME);
    if marker.exists() {
        log::warn!("Destination: {dest:?} is already initialised.");
        return Ok(());
    }
    fs::create_dir_all(dest).map_err(|e| DestinationError::Io(dest.to_path_buf(), e))?;
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&marker)
        .map_err(|e| DestinationError::Io(marker.clone(), e))?;
    log::info!("Destination: Initialised backup destination {dest:?}.");
    Ok(())
}

pub fn check(dest: &str) -> Result<PathBuf, DestinationError> {
    if dest.trim().is_empty() {
        return Err(DestinationError::NotSet);
    }
    let root = PathBuf::from(dest.trim());
    if !root.is_dir() {
        return Err(DestinationError::Missing(root));
    }
    if !root.join(INIT_MARKER_FILE_NAME).exists() {
        return Err(DestinationError::NotInitialized(root));
    }
    Ok(root)
}

pub fn client_dir(dest: &Path, profile: &str, client: &str) -> PathBuf {
    dest.join(profile).join(client)
}

pub fn ensure_client_dir(dest: &Path, profile: &str, client: &str) -> Result<PathBuf, DestinationError> {
    let dir = client_dir(dest, profile, client);
    fs::create_dir_all(&dir).map_err(|e| DestinationError::Io(dir.clone(), e))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_initialize_then_check() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("backup");
        let dest_str = dest.to_string_lossy().to_string();

        assert!(matches!(check(&dest_str), Err(DestinationError::Missing(_))));
        fs::create_dir_all(&dest).unwrap();
        assert!(matches!(
            check(&dest_str),
            Err(DestinationError::NotInitialized(_))
        ));

        initialize(&dest).unwrap();
        initialize(&dest).unwrap();

        assert_eq!(check(&dest_str).unwrap(), dest);
        assert!(matches!(check("  "), Err(DestinationError::NotSet)));
    }

    #[test]
    fn test_client_dir_layout() {
        let temp_dir = TempDir::new().unwrap();
        let dir = ensure_client_dir(temp_dir.path(), "rubac", "esme").unwrap();
        assert_eq!(dir, temp_dir.path().join("rubac").join("esme"));
        assert!(dir.is_dir());
    }
}
