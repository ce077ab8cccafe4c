/*
 * This module is responsible for persisting backup profiles. A profile is one JSON
 * document in the data directory (`<datadir>/<profile>.json`) holding the global
 * settings and every client scope, including each client's generation table.
 *
 * It includes a trait for profile operations (`ProfileManagerOperations`) so the
 * config store and the command handler can be tested against an in-memory double,
 * and a concrete implementation (`CoreProfileManager`) backed by the file system.
 * Saves go through a sibling temporary file and a rename, so an interrupted write
 * never leaves a truncated profile behind.
 */
use super::models::BackupConfig;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const PROFILE_FILE_EXTENSION: &str = "json";
pub const DEFAULT_PROFILE_NAME: &str = "rubac";

#[derive(Debug)]
pub enum ProfileError {
    Io(io::Error),
    Serde(serde_json::Error),
    InvalidProfileName(String),
}

impl From<io::Error> for ProfileError {
    fn from(err: io::Error) -> Self {
        ProfileError::Io(err)
    }
}

impl From<serde_json::Error> for ProfileError {
    fn from(err: serde_json::Error) -> Self {
        ProfileError::Serde(err)
    }
}

impl std::fmt::Display for ProfileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileError::Io(e) => write!(f, "I/O error: {e}"),
            ProfileError::Serde(e) => write!(f, "Malformed profile document: {e}"),
            ProfileError::InvalidProfileName(name) => write!(
                f,
                "Invalid profile name: {name:?}. Contains invalid characters or is empty."
            ),
        }
    }
}

impl std::error::Error for ProfileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProfileError::Io(e) => Some(e),
            ProfileError::Serde(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProfileError>;

pub fn sanitize_profile_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/*
 * Normalises a profile argument the way operators tend to pass it: a bare name,
 * a file name with the `.json` extension, or even a path to the profile file.
 */
pub fn profile_name_from_arg(arg: &str) -> String {
    let base = Path::new(arg.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = base
        .strip_suffix(&format!(".{PROFILE_FILE_EXTENSION}"))
        .unwrap_or(&base);
    sanitize_profile_name(stem)
}

pub trait ProfileManagerOperations: Send + Sync {
    /*
     * Loads the named profile. `Ok(None)` means no profile file exists yet, which
     * callers treat as an invitation to bootstrap a new one.
     */
    fn load_config(&self, data_dir: &Path, profile_name: &str) -> Result<Option<BackupConfig>>;
    fn save_config(&self, data_dir: &Path, profile_name: &str, config: &BackupConfig)
    -> Result<()>;
    fn get_profile_file_path(&self, data_dir: &Path, profile_name: &str) -> Result<PathBuf>;
}

pub struct CoreProfileManager {}

impl CoreProfileManager {
    pub fn new() -> Self {
        CoreProfileManager {}
    }

    fn profile_file_path_impl(data_dir: &Path, profile_name: &str) -> Result<PathBuf> {
        let sanitized = sanitize_profile_name(profile_name);
        if sanitized.is_empty() || sanitized != profile_name.trim() {
            return Err(ProfileError::InvalidProfileName(profile_name.to_string()));
        }
        Ok(data_dir.join(format!("{sanitized}.{PROFILE_FILE_EXTENSION}")))
    }
}

impl Default for CoreProfileManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileManagerOperations for CoreProfileManager {
    fn load_config(&self, data_dir: &Path, profile_name: &str) -> Result<Option<BackupConfig>> {
        log::trace!("CoreProfileManager: Loading profile '{profile_name}' from {data_dir:?}");
        let file_path = Self::profile_file_path_impl(data_dir, profile_name)?;

        if !file_path.exists() {
            log::debug!("CoreProfileManager: Profile file {file_path:?} not found.");
            return Ok(None);
        }

        let file = File::open(&file_path)?;
        let reader = BufReader::new(file);
        let config: BackupConfig = serde_json::from_reader(reader)?;
        log::debug!(
            "CoreProfileManager: Loaded profile '{profile_name}' with {} client(s) from {file_path:?}.",
            config.clients.len()
        );
        Ok(Some(config))
    }

    fn save_config(
        &self,
        data_dir: &Path,
        profile_name: &str,
        config: &BackupConfig,
    ) -> Result<()> {
        let file_path = Self::profile_file_path_impl(data_dir, profile_name)?;
        if !data_dir.exists() {
            fs::create_dir_all(data_dir)?;
            log::debug!("CoreProfileManager: Created data directory {data_dir:?}");
        }

        let tmp_path = file_path.with_extension(format!("{PROFILE_FILE_EXTENSION}.tmp"));
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, config)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &file_path)?;
        log::info!("CoreProfileManager: Saved profile '{profile_name}' to {file_path:?}.");
        Ok(())
    }

    fn get_profile_file_path(&self, data_dir: &Path, profile_name: &str) -> Result<PathBuf> {
        Self::profile_file_path_impl(data_dir, profile_name)
    }
}

#[cfg(test)]
mod profile_tests {
    use super::*;
    use crate::core::models::ClientConfig;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_profile_returns_none() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir for test");
        let manager = CoreProfileManager::new();

        let loaded = manager.load_config(temp_dir.path(), "rubac")?;

        assert!(loaded.is_none());
        Ok(())
    }

    #[test]
    fn test_save_and_load_profile() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir for test");
        let manager = CoreProfileManager::new();
        let mut config = BackupConfig::default();
        config.globals.dest = "/mnt/backup".to_string();
        let mut client = ClientConfig::default();
        client.includes = vec!["/home/steeve".to_string()];
        client.incrementals.insert(0, "rubac.2024-01-01".to_string());
        config.clients.insert("esme".to_string(), client);

        manager.save_config(temp_dir.path(), "rubac", &config)?;
        let loaded = manager
            .load_config(temp_dir.path(), "rubac")?
            .expect("profile should exist after save");

        assert_eq!(loaded, config);
        assert!(
            !temp_dir.path().join("rubac.json.tmp").exists(),
            "temporary file must be renamed away"
        );
        Ok(())
    }

    #[test]
    fn test_malformed_profile_is_a_serde_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir for test");
        fs::write(temp_dir.path().join("broken.json"), "{ not json").unwrap();
        let manager = CoreProfileManager::new();

        let result = manager.load_config(temp_dir.path(), "broken");

        assert!(matches!(result, Err(ProfileError::Serde(_))));
    }

    #[test]
    fn test_invalid_profile_names_are_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir for test");
        let manager = CoreProfileManager::new();
        assert!(matches!(
            manager.save_config(temp_dir.path(), "", &BackupConfig::default()),
            Err(ProfileError::InvalidProfileName(_))
        ));
        assert!(matches!(
            manager.load_config(temp_dir.path(), "../etc/passwd"),
            Err(ProfileError::InvalidProfileName(_))
        ));
    }

    #[test]
    fn test_profile_name_from_arg_variations() {
        assert_eq!(profile_name_from_arg("rubac"), "rubac");
        assert_eq!(profile_name_from_arg("nightly.json"), "nightly");
        assert_eq!(profile_name_from_arg("/etc/rubac/weekly.json"), "weekly");
        assert_eq!(profile_name_from_arg(" my profile "), "myprofile");
    }
}
