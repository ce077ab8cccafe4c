/*
 * Typed representation of a persisted backup profile. A profile document holds one
 * global scope plus one scope per client. List-valued settings live in memory as
 * ordered `Vec<String>`; on disk they are delimiter-joined strings, which keeps the
 * file readable and hand-editable. Scalar settings carry explicit defaults so that
 * callers never distinguish "missing" from "empty".
 */
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_NINC: u32 = 5;
pub const DEFAULT_SMTP: &str = "localhost";
pub const LIST_DELIM_PATHS: char = ',';
pub const LIST_DELIM_OPTS: char = ' ';

/// Program version stamped into every saved profile. The stored version is compared
/// on load (see `ConfigStore::load`) and then overwritten with this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: String,
}

impl ConfigVersion {
    pub fn current() -> Self {
        let mut parts = env!("CARGO_PKG_VERSION").split('.');
        let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let revision = parts.next().unwrap_or("0").to_string();
        ConfigVersion {
            major,
            minor,
            revision,
        }
    }
}

impl Default for ConfigVersion {
    fn default() -> Self {
        Self::current()
    }
}

impl std::fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{} (rev {})", self.major, self.minor, self.revision)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub version: ConfigVersion,
    #[serde(with = "comma_list")]
    pub includes: Vec<String>,
    #[serde(with = "comma_list")]
    pub excludes: Vec<String>,
    #[serde(with = "space_list")]
    pub opts: Vec<String>,
    pub dest: String,
    pub ninc: u32,
    pub compress: bool,
    pub logdir: String,
    pub logname: String,
    pub email: String,
    pub smtp: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            version: ConfigVersion::current(),
            includes: Vec::new(),
            excludes: Vec::new(),
            opts: Vec::new(),
            dest: String::new(),
            ninc: DEFAULT_NINC,
            compress: false,
            logdir: String::new(),
            logname: String::new(),
            email: String::new(),
            smtp: DEFAULT_SMTP.to_string(),
        }
    }
}

/// Per-client scope. `ninc` and `compress` are optional overrides of the global
/// values; list fields are additive overlays on the global lists. `incrementals`
/// maps a slot number (0 = newest) to a generation directory name, where an empty
/// name marks an unused slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub address: String,
    #[serde(with = "comma_list")]
    pub includes: Vec<String>,
    #[serde(with = "comma_list")]
    pub excludes: Vec<String>,
    #[serde(with = "space_list")]
    pub opts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ninc: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
    pub incrementals: BTreeMap<u32, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub globals: GlobalConfig,
    pub clients: BTreeMap<String, ClientConfig>,
}

/*
 * Splits a delimiter-joined list, trimming each item and dropping empty ones.
 * Order is preserved; duplicates are kept (callers merge with `merge_items`).
 */
pub fn split_list(raw: &str, delim: char) -> Vec<String> {
    raw.split(delim)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Union preserving order: existing items first, then new ones not yet present.
pub fn merge_items(existing: &[String], additions: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(existing.len() + additions.len());
    for item in existing.iter().chain(additions.iter()) {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

pub fn remove_items(existing: &[String], removals: &[String]) -> Vec<String> {
    existing
        .iter()
        .filter(|item| !removals.contains(item))
        .cloned()
        .collect()
}

macro_rules! joined_list_serde {
    ($name:ident, $delim:expr) => {
        pub(crate) mod $name {
            use serde::{Deserialize, Deserializer, Serializer};

            pub fn serialize<S: Serializer>(
                items: &[String],
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&items.join($delim.to_string().as_str()))
            }

            pub fn deserialize<'de, D: Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Vec<String>, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Ok(super::split_list(&raw, $delim))
            }
        }
    };
}

joined_list_serde!(comma_list, super::LIST_DELIM_PATHS);
joined_list_serde!(space_list, super::LIST_DELIM_OPTS);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_trims_and_drops_empty() {
        assert_eq!(
            split_list(" /home/a , ,/home/b,", ','),
            vec!["/home/a".to_string(), "/home/b".to_string()]
        );
        assert!(split_list("", ',').is_empty());
    }

    #[test]
    fn test_merge_items_keeps_existing_order_and_drops_duplicates() {
        let existing = vec!["a".to_string(), "b".to_string()];
        let additions = vec!["b".to_string(), "c".to_string(), "a".to_string()];
        assert_eq!(
            merge_items(&existing, &additions),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_lists_serialize_as_joined_strings() {
        let mut config = BackupConfig::default();
        config.globals.includes = vec!["/home".to_string(), "/etc".to_string()];
        config.globals.opts = vec!["--acls".to_string(), "--xattrs".to_string()];

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["globals"]["includes"], "/home,/etc");
        assert_eq!(json["globals"]["opts"], "--acls --xattrs");

        let back: BackupConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.globals.includes, config.globals.includes);
        assert_eq!(back.globals.opts, config.globals.opts);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: BackupConfig =
            serde_json::from_str(r#"{"globals": {"dest": "/mnt/backup"}, "clients": {"esme": {}}}"#)
                .unwrap();
        assert_eq!(config.globals.dest, "/mnt/backup");
        assert_eq!(config.globals.ninc, DEFAULT_NINC);
        assert_eq!(config.globals.smtp, DEFAULT_SMTP);
        let esme = &config.clients["esme"];
        assert!(esme.ninc.is_none());
        assert!(esme.incrementals.is_empty());
    }

    #[test]
    fn test_incremental_slots_round_trip_with_string_keys() {
        let json = r#"{"clients": {"esme": {"incrementals": {"0": "rubac.2024-01-02", "1": "rubac.2024-01-01"}}}}"#;
        let config: BackupConfig = serde_json::from_str(json).unwrap();
        let slots = &config.clients["esme"].incrementals;
        assert_eq!(slots.get(&0).map(String::as_str), Some("rubac.2024-01-02"));
        assert_eq!(slots.get(&1).map(String::as_str), Some("rubac.2024-01-01"));
    }
}
