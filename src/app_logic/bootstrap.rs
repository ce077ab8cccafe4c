/*
 * Interactive creation of a profile that does not exist yet. The operator is
 * asked whether to create it and, optionally, for a destination and retention
 * depth. Input and output are injected so the dialogue can be scripted.
 */
use crate::core::config_store::{ConfigKey, ConfigStore};
use crate::core::destination;
use crate::core::error::{BackupError, Result};
use std::io::{BufRead, Write};
use std::path::Path;

pub struct Console {
    pub input: Box<dyn BufRead + Send>,
    pub output: Box<dyn Write + Send>,
}

fn ask(input: &mut dyn BufRead, output: &mut dyn Write, question: &str) -> Result<String> {
    write!(output, "{question}").map_err(|e| BackupError::io("console", e))?;
    output.flush().map_err(|e| BackupError::io("console", e))?;
    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .map_err(|e| BackupError::io("console", e))?;
    Ok(answer.trim().to_string())
}

/// Returns `Ok(false)` when the operator declines. On acceptance the profile is
/// saved right away, so it exists even if the rest of the invocation fails.
pub fn bootstrap_profile(store: &mut ConfigStore, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<bool> {
    let path = store.profile_file_path()?;
    let answer = ask(
        input,
        output,
        &format!(
            "Profile '{}' does not exist ({}). Create it? [y/N] ",
            store.profile(),
            path.display()
        ),
    )?;
    if !matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes") {
        log::info!("Bootstrap: Operator declined to create profile '{}'.", store.profile());
        return Ok(false);
    }

    let dest = ask(input, output, "Backup destination (empty to set later): ")?;
    if !dest.is_empty() {
        destination::initialize(Path::new(&dest))?;
        store.set_global(ConfigKey::Dest, &dest)?;
    }
    let ninc = ask(
        input,
        output,
        &format!(
            "Number of incremental generations [{}]: ",
            store.globals().ninc
        ),
    )?;
    if !ninc.is_empty()
        && let Err(e) = store.set_global(ConfigKey::Ninc, &ninc)
    {
        log::warn!("Bootstrap: {e}, keeping default");
    }
    store.save()?;
    log::info!("Bootstrap: Created profile '{}' at {path:?}.", store.profile());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profiles::CoreProfileManager;
    use std::io::Cursor;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_accepting_creates_profile_with_destination() -> Result<()> {
        // Arrange
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("backup");
        let mut store = ConfigStore::new(&temp.path().join("data"), Arc::new(CoreProfileManager::new()));
        assert!(!store.load("rubac")?);
        let mut input = Cursor::new(format!("y\n{}\n3\n", dest.display()));
        let mut output = Vec::new();

        // Act
        let created = bootstrap_profile(&mut store, &mut input, &mut output)?;

        // Assert
        assert!(created);
        assert!(String::from_utf8(output).unwrap().contains("Create it?"));
        assert!(dest.join(destination::INIT_MARKER_FILE_NAME).exists());
        let mut reloaded = ConfigStore::new(&temp.path().join("data"), Arc::new(CoreProfileManager::new()));
        assert!(reloaded.load("rubac")?);
        assert_eq!(reloaded.globals().ninc, 3);
        Ok(())
    }

    #[test]
    fn test_declining_leaves_nothing_on_disk() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let mut store = ConfigStore::new(temp.path(), Arc::new(CoreProfileManager::new()));
        store.load("rubac")?;
        let mut input = Cursor::new("n\n");
        let mut output = Vec::new();

        assert!(!bootstrap_profile(&mut store, &mut input, &mut output)?);
        assert!(!store.profile_file_path()?.exists());
        Ok(())
    }
}
