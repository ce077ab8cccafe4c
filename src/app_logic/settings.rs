/*
 * Applies the configuration switches of one invocation to the `ConfigStore`.
 * Global scalars (destination, log location, mail) always land in the global
 * scope. List and per-client keys go either to the global scope (`global`) or
 * to each selected client, as additions or (`delete`) removals.
 */
use crate::core::config_store::{ConfigKey, ConfigStore, UpdateOp};
use crate::core::destination;
use crate::core::error::Result;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub dest: Option<String>,
    pub logdir: Option<String>,
    pub logname: Option<String>,
    pub email: Option<String>,
    pub smtp: Option<String>,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub opts: Vec<String>,
    pub address: Option<String>,
    pub ninc: Option<i64>,
    pub compress: Option<bool>,
    pub global: bool,
    pub delete: bool,
}

impl Settings {
    // Any list key or per-client scalar given.
    pub fn has_scoped_changes(&self) -> bool {
        !self.includes.is_empty()
            || !self.excludes.is_empty()
            || !self.opts.is_empty()
            || self.address.is_some()
            || self.ninc.is_some()
            || self.compress.is_some()
    }

    // `--delete` with clients but no keys removes the clients themselves.
    pub fn deletes_clients(&self) -> bool {
        self.delete && !self.global && !self.has_scoped_changes()
    }
}

/*
 * Applies `settings` and reports whether the store changed. The caller persists
 * once afterwards.
 */
pub fn apply(store: &mut ConfigStore, settings: &Settings, clients: &[String]) -> Result<bool> {
    let mut changed = false;
    let op = if settings.delete {
        UpdateOp::Delete
    } else {
        UpdateOp::Add
    };

    if let Some(dest) = &settings.dest {
        let dest = dest.trim();
        destination::initialize(Path::new(dest))?;
        store.set_global(ConfigKey::Dest, dest)?;
        changed = true;
    }
    let scalars = [
        (ConfigKey::Logdir, &settings.logdir),
        (ConfigKey::Logname, &settings.logname),
        (ConfigKey::Email, &settings.email),
        (ConfigKey::Smtp, &settings.smtp),
    ];
    for (key, value) in scalars {
        if let Some(value) = value {
            store.set_global(key, value)?;
            changed = true;
        }
    }

    if settings.deletes_clients() {
        for client in clients {
            changed |= store.delete_client(client);
        }
        return Ok(changed);
    }

    let mut updates: Vec<(ConfigKey, String, Option<char>)> = Vec::new();
    for (key, items) in [
        (ConfigKey::Includes, &settings.includes),
        (ConfigKey::Excludes, &settings.excludes),
        (ConfigKey::Opts, &settings.opts),
    ] {
        if !items.is_empty() {
            let delim = key.delimiter();
            updates.push((key, items.join(delim.to_string().as_str()), Some(delim)));
        }
    }
    match settings.ninc {
        Some(n) if n < 0 => log::error!("Settings: ninc must not be negative, ignoring {n}"),
        Some(n) => updates.push((ConfigKey::Ninc, n.to_string(), None)),
        None => {}
    }
    if let Some(compress) = settings.compress {
        updates.push((ConfigKey::Compress, compress.to_string(), None));
    }
    if let Some(address) = &settings.address {
        if settings.global {
            log::warn!("Settings: address is a per-client setting, ignoring it for --global");
        } else {
            updates.push((ConfigKey::Address, address.trim().to_string(), None));
        }
    }
    if updates.is_empty() {
        return Ok(changed);
    }

    if settings.global {
        for (key, value, delim) in &updates {
            store.update_global(op, *key, value, *delim)?;
        }
        return Ok(true);
    }
    if clients.is_empty() {
        log::warn!("Settings: no client selected, client settings not applied");
        return Ok(changed);
    }
    for client in clients {
        for (key, value, delim) in &updates {
            store.update_client(client, op, *key, value, *delim)?;
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profiles::CoreProfileManager;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> ConfigStore {
        let mut store = ConfigStore::new(temp.path(), Arc::new(CoreProfileManager::new()));
        store.load("rubac").unwrap();
        store
    }

    #[test]
    fn test_client_lists_added_then_deleted() -> Result<()> {
        // Arrange
        let temp = TempDir::new().unwrap();
        let mut store = store(&temp);
        let clients = vec!["esme".to_string()];
        let add = Settings {
            includes: vec!["/home/steeve/".to_string(), "/etc".to_string()],
            excludes: vec!["*/tmp/".to_string()],
            ninc: Some(2),
            ..Default::default()
        };

        // Act
        assert!(apply(&mut store, &add, &clients)?);

        // Assert
        assert_eq!(
            store.client_key_list("esme", ConfigKey::Includes),
            vec!["/home/steeve".to_string(), "/etc".to_string()]
        );
        assert_eq!(store.client_ninc("esme"), 2);

        let delete = Settings {
            excludes: vec!["*/tmp/".to_string()],
            delete: true,
            ..Default::default()
        };
        apply(&mut store, &delete, &clients)?;
        assert!(store.client_key_list("esme", ConfigKey::Excludes).is_empty());
        Ok(())
    }

    #[test]
    fn test_global_settings_and_destination() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let mut store = store(&temp);
        let dest = temp.path().join("backup");
        let settings = Settings {
            dest: Some(dest.display().to_string()),
            email: Some("root@localhost".to_string()),
            opts: vec!["--acls".to_string(), "--xattrs".to_string()],
            global: true,
            ..Default::default()
        };

        apply(&mut store, &settings, &[])?;

        assert!(dest.join(destination::INIT_MARKER_FILE_NAME).exists());
        assert_eq!(store.get_global(ConfigKey::Dest)?, dest.display().to_string());
        assert_eq!(store.get_global(ConfigKey::Opts)?, "--acls --xattrs");
        assert_eq!(store.get_global(ConfigKey::Email)?, "root@localhost");
        Ok(())
    }

    #[test]
    fn test_negative_ninc_is_ignored() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let mut store = store(&temp);
        let settings = Settings {
            ninc: Some(-1),
            ..Default::default()
        };

        let changed = apply(&mut store, &settings, &["esme".to_string()])?;

        assert!(!changed);
        assert_eq!(store.client_ninc("esme"), crate::core::models::DEFAULT_NINC);
        Ok(())
    }

    #[test]
    fn test_delete_without_keys_removes_clients() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let mut store = store(&temp);
        store.client_mut("esme");
        store.client_mut("steeve");
        let settings = Settings {
            delete: true,
            ..Default::default()
        };

        apply(&mut store, &settings, &["esme".to_string()])?;

        assert_eq!(store.client_ids(), vec!["steeve".to_string()]);
        Ok(())
    }
}
