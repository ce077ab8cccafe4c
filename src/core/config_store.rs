/*
 * The configuration store: one loaded profile document plus the operations the
 * rest of the program uses to read and mutate it. Settings are addressed by a
 * closed set of keys (`ConfigKey`) in either the global scope or a client scope.
 *
 * List-valued keys follow additive/subtractive update semantics: `add` merges new
 * items after the existing ones (duplicates dropped), `delete` removes named items,
 * or resets the whole key when no delimiter is given. Scalar keys are overwritten on
 * `add` and reset to their default on `delete`.
 *
 * Client scopes are created lazily on first mutable reference so that any client id
 * reaching a run, history, search, prune or restore has a scope with defaults.
 * Persistence is delegated to a `ProfileManagerOperations` implementation.
 */
use super::models::{
    BackupConfig, ClientConfig, ConfigVersion, DEFAULT_SMTP, LIST_DELIM_OPTS, LIST_DELIM_PATHS,
    merge_items, remove_items, split_list,
};
use super::profiles::{ProfileError, ProfileManagerOperations};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug)]
pub enum ConfigError {
    Profile(ProfileError),
    UnknownOperation(String),
    UnknownKey(String),
    KeyNotInScope { key: ConfigKey, scope: Scope },
    InvalidValue { key: ConfigKey, value: String },
    UnsupportedVersion { found: ConfigVersion, supported: ConfigVersion },
}

impl ConfigError {
    /*
     * An unknown update operation tag can only come from a construction bug in the
     * caller, never from the environment, so it aborts the whole process.
     */
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConfigError::UnknownOperation(_))
    }
}

impl From<ProfileError> for ConfigError {
    fn from(err: ProfileError) -> Self {
        ConfigError::Profile(err)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Profile(e) => write!(f, "Profile error: {e}"),
            ConfigError::UnknownOperation(op) => {
                write!(f, "Unknown configuration update operation '{op}'")
            }
            ConfigError::UnknownKey(key) => write!(f, "Unknown configuration key '{key}'"),
            ConfigError::KeyNotInScope { key, scope } => {
                write!(f, "Key '{key}' cannot be set in the {scope} scope")
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value '{value}' for key '{key}'")
            }
            ConfigError::UnsupportedVersion { found, supported } => write!(
                f,
                "Profile was written by version {found}, which is newer than this program ({supported})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Profile(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Add,
    Delete,
}

impl FromStr for UpdateOp {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(UpdateOp::Add),
            "delete" => Ok(UpdateOp::Delete),
            other => Err(ConfigError::UnknownOperation(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Client,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Client => write!(f, "client"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    Includes,
    Excludes,
    Opts,
    Dest,
    Ninc,
    Compress,
    Logdir,
    Logname,
    Email,
    Smtp,
    Address,
}

impl ConfigKey {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigKey::Includes => "includes",
            ConfigKey::Excludes => "excludes",
            ConfigKey::Opts => "opts",
            ConfigKey::Dest => "dest",
            ConfigKey::Ninc => "ninc",
            ConfigKey::Compress => "compress",
            ConfigKey::Logdir => "logdir",
            ConfigKey::Logname => "logname",
            ConfigKey::Email => "email",
            ConfigKey::Smtp => "smtp",
            ConfigKey::Address => "address",
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            ConfigKey::Includes | ConfigKey::Excludes | ConfigKey::Opts
        )
    }

    /// Delimiter used when the key is joined on disk or split from operator input.
    pub fn delimiter(&self) -> char {
        match self {
            ConfigKey::Opts => LIST_DELIM_OPTS,
            _ => LIST_DELIM_PATHS,
        }
    }

    pub fn allowed_in(&self, scope: Scope) -> bool {
        match scope {
            Scope::Global => !matches!(self, ConfigKey::Address),
            Scope::Client => matches!(
                self,
                ConfigKey::Includes
                    | ConfigKey::Excludes
                    | ConfigKey::Opts
                    | ConfigKey::Ninc
                    | ConfigKey::Compress
                    | ConfigKey::Address
            ),
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let key = match s {
            "includes" => ConfigKey::Includes,
            "excludes" => ConfigKey::Excludes,
            "opts" => ConfigKey::Opts,
            "dest" => ConfigKey::Dest,
            "ninc" => ConfigKey::Ninc,
            "compress" => ConfigKey::Compress,
            "logdir" => ConfigKey::Logdir,
            "logname" => ConfigKey::Logname,
            "email" => ConfigKey::Email,
            "smtp" => ConfigKey::Smtp,
            "address" => ConfigKey::Address,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        };
        Ok(key)
    }
}

// Include paths lose surrounding whitespace and a trailing separator, except "/".
pub fn normalize_include(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.len() > 1 {
        trimmed.trim_end_matches('/').to_string()
    } else {
        trimmed.to_string()
    }
}

fn join_list(items: &[String], key: ConfigKey) -> String {
    items.join(key.delimiter().to_string().as_str())
}

fn parse_bool(key: ConfigKey, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_ninc(value: &str) -> Result<u32> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidValue {
            key: ConfigKey::Ninc,
            value: value.to_string(),
        })
}

fn split_items(key: ConfigKey, value: &str, delimiter: char) -> Vec<String> {
    let items = split_list(value, delimiter);
    if key == ConfigKey::Includes {
        items.iter().map(|item| normalize_include(item)).collect()
    } else {
        items
    }
}

/*
 * Applies one update to a list field. `delimiter == None` on delete drops the
 * whole list; on add the key's own delimiter is used.
 */
fn update_list(
    list: &mut Vec<String>,
    key: ConfigKey,
    op: UpdateOp,
    value: &str,
    delimiter: Option<char>,
) {
    match (op, delimiter) {
        (UpdateOp::Add, delim) => {
            let additions = split_items(key, value, delim.unwrap_or(key.delimiter()));
            *list = merge_items(list, &additions);
        }
        (UpdateOp::Delete, None) => list.clear(),
        (UpdateOp::Delete, Some(delim)) => {
            let removals = split_items(key, value, delim);
            *list = remove_items(list, &removals);
        }
    }
}

pub struct ConfigStore {
    data_dir: PathBuf,
    profile: String,
    config: BackupConfig,
    profile_manager: Arc<dyn ProfileManagerOperations>,
}

impl ConfigStore {
    pub fn new(data_dir: &Path, profile_manager: Arc<dyn ProfileManagerOperations>) -> Self {
        ConfigStore {
            data_dir: data_dir.to_path_buf(),
            profile: String::new(),
            config: BackupConfig::default(),
            profile_manager,
        }
    }

    /// Loads the named profile. Returns `Ok(false)` when no persisted document exists;
    /// the store is then reset to defaults under that profile name and the caller may
    /// offer an interactive bootstrap. A document written by a newer major version is
    /// rejected, otherwise its version stamp is aligned with this program's.
    pub fn load(&mut self, profile: &str) -> Result<bool> {
        self.profile = profile.to_string();
        match self.profile_manager.load_config(&self.data_dir, profile)? {
            None => {
                log::info!("ConfigStore: No persisted profile '{profile}', starting from defaults.");
                self.config = BackupConfig::default();
                Ok(false)
            }
            Some(mut config) => {
                let current = ConfigVersion::current();
                if config.globals.version.major > current.major {
                    return Err(ConfigError::UnsupportedVersion {
                        found: config.globals.version,
                        supported: current,
                    });
                }
                if config.globals.version != current {
                    log::debug!(
                        "ConfigStore: Aligning profile version {} to {current}.",
                        config.globals.version
                    );
                    config.globals.version = current;
                }
                self.config = config;
                Ok(true)
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        log::debug!("ConfigStore: Saving profile '{}'.", self.profile);
        self.profile_manager
            .save_config(&self.data_dir, &self.profile, &self.config)?;
        Ok(())
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn profile_file_path(&self) -> Result<PathBuf> {
        Ok(self
            .profile_manager
            .get_profile_file_path(&self.data_dir, &self.profile)?)
    }

    pub fn globals(&self) -> &super::models::GlobalConfig {
        &self.config.globals
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.config.clients.keys().cloned().collect()
    }

    // Lazily creates the client scope with defaults.
    pub fn client_mut(&mut self, client: &str) -> &mut ClientConfig {
        if !self.config.clients.contains_key(client) {
            log::debug!("ConfigStore: Creating client scope '{client}' with defaults.");
        }
        self.config.clients.entry(client.to_string()).or_default()
    }

    pub fn client(&self, client: &str) -> Option<&ClientConfig> {
        self.config.clients.get(client)
    }

    pub fn delete_client(&mut self, client: &str) -> bool {
        let removed = self.config.clients.remove(client).is_some();
        if removed {
            log::info!("ConfigStore: Deleted client '{client}'.");
        } else {
            log::warn!("ConfigStore: Client '{client}' not found, nothing deleted.");
        }
        removed
    }

    /// Reads a global key rendered as a string. List keys are joined with their
    /// delimiter, so an unset key reads as its default (empty string, `5` for ninc).
    pub fn get_global(&self, key: ConfigKey) -> Result<String> {
        if !key.allowed_in(Scope::Global) {
            return Err(ConfigError::KeyNotInScope {
                key,
                scope: Scope::Global,
            });
        }
        let g = &self.config.globals;
        let rendered = match key {
            ConfigKey::Includes => join_list(&g.includes, key),
            ConfigKey::Excludes => join_list(&g.excludes, key),
            ConfigKey::Opts => join_list(&g.opts, key),
            ConfigKey::Dest => g.dest.clone(),
            ConfigKey::Ninc => g.ninc.to_string(),
            ConfigKey::Compress => g.compress.to_string(),
            ConfigKey::Logdir => g.logdir.clone(),
            ConfigKey::Logname => g.logname.clone(),
            ConfigKey::Email => g.email.clone(),
            ConfigKey::Smtp => g.smtp.clone(),
            ConfigKey::Address => {
                return Err(ConfigError::KeyNotInScope {
                    key,
                    scope: Scope::Global,
                });
            }
        };
        Ok(rendered)
    }

    pub fn set_global(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        if key.is_list() {
            let list = self.global_list_mut(key)?;
            *list = split_items(key, value, key.delimiter());
            return Ok(());
        }
        self.set_global_scalar(key, Some(value))
    }

    pub fn update_global(
        &mut self,
        op: UpdateOp,
        key: ConfigKey,
        value: &str,
        delimiter: Option<char>,
    ) -> Result<()> {
        log::debug!("ConfigStore: update global {op:?} {key}='{value}'");
        if key.is_list() {
            let list = self.global_list_mut(key)?;
            update_list(list, key, op, value, delimiter);
            return Ok(());
        }
        match op {
            UpdateOp::Add => self.set_global_scalar(key, Some(value)),
            UpdateOp::Delete => self.set_global_scalar(key, None),
        }
    }

    pub fn get_client(&mut self, client: &str, key: ConfigKey) -> Result<String> {
        if !key.allowed_in(Scope::Client) {
            return Err(ConfigError::KeyNotInScope {
                key,
                scope: Scope::Client,
            });
        }
        let c = self.client_mut(client);
        let rendered = match key {
            ConfigKey::Includes => join_list(&c.includes, key),
            ConfigKey::Excludes => join_list(&c.excludes, key),
            ConfigKey::Opts => join_list(&c.opts, key),
            ConfigKey::Ninc => c.ninc.map(|n| n.to_string()).unwrap_or_default(),
            ConfigKey::Compress => c.compress.map(|b| b.to_string()).unwrap_or_default(),
            ConfigKey::Address => c.address.clone(),
            _ => {
                return Err(ConfigError::KeyNotInScope {
                    key,
                    scope: Scope::Client,
                });
            }
        };
        Ok(rendered)
    }

    pub fn set_client(&mut self, client: &str, key: ConfigKey, value: &str) -> Result<()> {
        if key.is_list() {
            let list = self.client_list_mut(client, key)?;
            *list = split_items(key, value, key.delimiter());
            return Ok(());
        }
        self.set_client_scalar(client, key, Some(value))
    }

    pub fn update_client(
        &mut self,
        client: &str,
        op: UpdateOp,
        key: ConfigKey,
        value: &str,
        delimiter: Option<char>,
    ) -> Result<()> {
        log::debug!("ConfigStore: update client '{client}' {op:?} {key}='{value}'");
        if key.is_list() {
            let list = self.client_list_mut(client, key)?;
            update_list(list, key, op, value, delimiter);
            return Ok(());
        }
        match op {
            UpdateOp::Add => self.set_client_scalar(client, key, Some(value)),
            UpdateOp::Delete => self.set_client_scalar(client, key, None),
        }
    }

    /// Global list followed by the client's additions, duplicates dropped.
    pub fn client_key_list(&self, client: &str, key: ConfigKey) -> Vec<String> {
        let global: &[String] = match key {
            ConfigKey::Includes => &self.config.globals.includes,
            ConfigKey::Excludes => &self.config.globals.excludes,
            ConfigKey::Opts => &self.config.globals.opts,
            _ => &[],
        };
        let client_items: &[String] = match (self.config.clients.get(client), key) {
            (Some(c), ConfigKey::Includes) => &c.includes,
            (Some(c), ConfigKey::Excludes) => &c.excludes,
            (Some(c), ConfigKey::Opts) => &c.opts,
            _ => &[],
        };
        merge_items(global, client_items)
    }

    pub fn client_ninc(&self, client: &str) -> u32 {
        self.config
            .clients
            .get(client)
            .and_then(|c| c.ninc)
            .unwrap_or(self.config.globals.ninc)
    }

    pub fn client_compress(&self, client: &str) -> bool {
        self.config
            .clients
            .get(client)
            .and_then(|c| c.compress)
            .unwrap_or(self.config.globals.compress)
    }

    /*
     * Network address used to reach the client. An empty address means the client
     * id itself; the loopback literal is reported as `localhost`.
     */
    pub fn client_address(&self, client: &str) -> String {
        let address = self
            .config
            .clients
            .get(client)
            .map(|c| c.address.trim())
            .unwrap_or_default();
        match address {
            "" => client.to_string(),
            "127.0.0.1" => "localhost".to_string(),
            other => other.to_string(),
        }
    }

    pub fn get_incremental(&self, client: &str, slot: u32) -> String {
        self.config
            .clients
            .get(client)
            .and_then(|c| c.incrementals.get(&slot))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_incremental(&mut self, client: &str, slot: u32, name: &str) {
        log::debug!("ConfigStore: client '{client}' slot {slot} = '{name}'");
        self.client_mut(client)
            .incrementals
            .insert(slot, name.to_string());
    }

    pub fn incrementals(&self, client: &str) -> BTreeMap<u32, String> {
        self.config
            .clients
            .get(client)
            .map(|c| c.incrementals.clone())
            .unwrap_or_default()
    }

    pub fn replace_incrementals(&mut self, client: &str, table: BTreeMap<u32, String>) {
        self.client_mut(client).incrementals.clear();
        for (slot, name) in table {
            self.set_incremental(client, slot, &name);
        }
    }

    fn global_list_mut(&mut self, key: ConfigKey) -> Result<&mut Vec<String>> {
        let g = &mut self.config.globals;
        match key {
            ConfigKey::Includes => Ok(&mut g.includes),
            ConfigKey::Excludes => Ok(&mut g.excludes),
            ConfigKey::Opts => Ok(&mut g.opts),
            _ => Err(ConfigError::KeyNotInScope {
                key,
                scope: Scope::Global,
            }),
        }
    }

    fn client_list_mut(&mut self, client: &str, key: ConfigKey) -> Result<&mut Vec<String>> {
        let c = self.client_mut(client);
        match key {
            ConfigKey::Includes => Ok(&mut c.includes),
            ConfigKey::Excludes => Ok(&mut c.excludes),
            ConfigKey::Opts => Ok(&mut c.opts),
            _ => Err(ConfigError::KeyNotInScope {
                key,
                scope: Scope::Client,
            }),
        }
    }

    // `None` resets the key to its default.
    fn set_global_scalar(&mut self, key: ConfigKey, value: Option<&str>) -> Result<()> {
        let g = &mut self.config.globals;
        match key {
            ConfigKey::Dest => g.dest = value.map(str::trim).unwrap_or_default().to_string(),
            ConfigKey::Ninc => {
                g.ninc = match value {
                    Some(v) => parse_ninc(v)?,
                    None => super::models::DEFAULT_NINC,
                }
            }
            ConfigKey::Compress => {
                g.compress = match value {
                    Some(v) => parse_bool(key, v)?,
                    None => false,
                }
            }
            ConfigKey::Logdir => g.logdir = value.map(str::trim).unwrap_or_default().to_string(),
            ConfigKey::Logname => {
                g.logname = value.map(str::trim).unwrap_or_default().to_string()
            }
            ConfigKey::Email => g.email = value.map(str::trim).unwrap_or_default().to_string(),
            ConfigKey::Smtp => {
                g.smtp = value
                    .map(str::trim)
                    .unwrap_or(DEFAULT_SMTP)
                    .to_string()
            }
            _ => {
                return Err(ConfigError::KeyNotInScope {
                    key,
                    scope: Scope::Global,
                });
            }
        }
        Ok(())
    }

    fn set_client_scalar(
        &mut self,
        client: &str,
        key: ConfigKey,
        value: Option<&str>,
    ) -> Result<()> {
        if !key.allowed_in(Scope::Client) {
            return Err(ConfigError::KeyNotInScope {
                key,
                scope: Scope::Client,
            });
        }
        let parsed_ninc = match (key, value) {
            (ConfigKey::Ninc, Some(v)) => Some(parse_ninc(v)?),
            _ => None,
        };
        let parsed_compress = match (key, value) {
            (ConfigKey::Compress, Some(v)) => Some(parse_bool(key, v)?),
            _ => None,
        };
        let c = self.client_mut(client);
        match key {
            ConfigKey::Ninc => c.ninc = parsed_ninc,
            ConfigKey::Compress => c.compress = parsed_compress,
            ConfigKey::Address => {
                c.address = value.map(str::trim).unwrap_or_default().to_string()
            }
            _ => {
                return Err(ConfigError::KeyNotInScope {
                    key,
                    scope: Scope::Client,
                });
            }
        }
        Ok(())
    }
}
