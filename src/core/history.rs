/*
 * A client's backup history and pruning.
 *
 * The history lists the numbered generations (slot 0 upwards, stopping at the
 * first empty slot) followed by the snapshot directories found on disk. Pruning
 * removes one generation: a numbered one closes the gap by moving every older
 * generation one slot younger, a snapshot is simply deleted.
 */
use super::config_store::ConfigStore;
use super::error::{BackupError, Result};
use super::generations::{self, GenerationTable};
use super::run_lock::RunLock;
use super::selector::Selector;
use super::signals::InterruptMonitor;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPosition {
    Slot(u32),
    Snapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    pub numbered: Vec<String>,
    pub snapshots: Vec<String>,
}

impl History {
    pub fn collect(table: &GenerationTable, client_dir: &Path, profile: &str) -> Result<Self> {
        Ok(History {
            numbered: table.numbered_history(),
            snapshots: snapshot_dirs(client_dir, profile)?,
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.numbered
            .iter()
            .chain(self.snapshots.iter())
            .map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries().nth(index)
    }

    pub fn len(&self) -> usize {
        self.numbered.len() + self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self, name: &str) -> Option<HistoryPosition> {
        if let Some(slot) = self.numbered.iter().position(|n| n == name) {
            return Some(HistoryPosition::Slot(slot as u32));
        }
        self.snapshots
            .iter()
            .any(|n| n == name)
            .then_some(HistoryPosition::Snapshot)
    }
}

/// Snapshot generation directories in `client_dir`, sorted by name.
pub fn snapshot_dirs(client_dir: &Path, profile: &str) -> Result<Vec<String>> {
    if !client_dir.is_dir() {
        return Ok(Vec::new());
    }
    let pattern = format!(
        "{}/{}*",
        glob::Pattern::escape(&client_dir.to_string_lossy()),
        glob::Pattern::escape(&generations::snapshot_prefix(profile))
    );
    let paths = glob::glob(&pattern)
        .map_err(|e| BackupError::Precondition(format!("invalid snapshot pattern {pattern}: {e}")))?;
    let mut names = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_dir() => {
                if let Some(name) = path.file_name() {
                    names.push(name.to_string_lossy().into_owned());
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("History: cannot read {:?}: {}", e.path(), e.error()),
        }
    }
    names.sort();
    Ok(names)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationUsage {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
}

/// Walks a generation directory and totals its entries. Hardlinked files are
/// counted at full size in every generation that holds them.
pub fn generation_usage(dir: &Path) -> GenerationUsage {
    let mut usage = GenerationUsage::default();
    for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        let file_type = entry.file_type();
        if file_type.is_dir() {
            usage.dirs += 1;
        } else {
            usage.files += 1;
            if let Ok(meta) = entry.metadata() {
                usage.bytes += meta.len();
            }
        }
    }
    usage
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub generation: String,
    pub position: HistoryPosition,
    pub removed: bool,
}

/// Removes the generation picked by `selector` from the client's history. The
/// table change is persisted unless `dry_run`, in which case nothing is deleted.
pub fn prune(
    store: &mut ConfigStore,
    client: &str,
    client_dir: &Path,
    selector: &Selector,
    interrupts: &InterruptMonitor,
    dry_run: bool,
) -> Result<PruneReport> {
    let mut table = GenerationTable::new(store.incrementals(client), store.client_ninc(client));
    let history = History::collect(&table, client_dir, store.profile())?;
    if history.is_empty() {
        return Err(BackupError::NotFound(format!(
            "no history found for client '{client}'"
        )));
    }
    // Slots past a gap are not part of the history, so oldest is its last entry.
    let name = match selector {
        Selector::Oldest => history.numbered.last().cloned().ok_or_else(|| {
            BackupError::NotFound(format!("no numbered backup found for client '{client}'"))
        })?,
        other => other.resolve(client, &table)?,
    };
    let position = history.position(&name).ok_or_else(|| {
        BackupError::NotFound(format!(
            "selected backup '{name}' not found in history of client '{client}'"
        ))
    })?;
    log::info!("Prune: {client}: deleting '{name}' ({position:?})");

    let _lock = RunLock::acquire(client_dir)?;
    let _guard = interrupts.guard();

    if let HistoryPosition::Slot(slot) = position {
        table.remove_slot(slot);
    }

    let target = client_dir.join(&name);
    let mut removed = false;
    if !target.exists() {
        log::warn!("Prune: backup {target:?} not found");
    } else if dry_run {
        log::info!("Prune: dry run, would remove {target:?}");
    } else {
        fs::remove_dir_all(&target)
            .map_err(|e| BackupError::io(target.display().to_string(), e))?;
        removed = true;
    }

    if !dry_run {
        store.replace_incrementals(client, table.into_slots());
        store.save()?;
    }
    Ok(PruneReport {
        generation: name,
        position,
        removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_store::ConfigKey;
    use crate::core::profiles::CoreProfileManager;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(names: &[&str]) -> (TempDir, ConfigStore, std::path::PathBuf) {
        let temp = TempDir::new().unwrap();
        let client_dir = temp.path().join("backup").join("rubac").join("esme");
        fs::create_dir_all(&client_dir).unwrap();
        let mut store = ConfigStore::new(&temp.path().join("data"), Arc::new(CoreProfileManager::new()));
        store.load("rubac").unwrap();
        store.set_client("esme", ConfigKey::Ninc, "3").unwrap();
        for (slot, name) in names.iter().enumerate() {
            store.set_incremental("esme", slot as u32, name);
            fs::create_dir_all(client_dir.join(name)).unwrap();
        }
        (temp, store, client_dir)
    }

    #[test]
    fn test_history_lists_slots_then_snapshots() {
        let (_temp, store, client_dir) = setup(&["rubac.2024-01-03", "rubac.2024-01-02"]);
        fs::create_dir_all(client_dir.join("rubac.snapshot.b")).unwrap();
        fs::create_dir_all(client_dir.join("rubac.snapshot.a")).unwrap();
        fs::write(client_dir.join("rubac.snapshot.file"), b"").unwrap();

        let table = GenerationTable::new(store.incrementals("esme"), 3);
        let history = History::collect(&table, &client_dir, "rubac").unwrap();

        assert_eq!(
            history.entries().collect::<Vec<_>>(),
            vec![
                "rubac.2024-01-03",
                "rubac.2024-01-02",
                "rubac.snapshot.a",
                "rubac.snapshot.b"
            ]
        );
        assert_eq!(history.position("rubac.2024-01-02"), Some(HistoryPosition::Slot(1)));
        assert_eq!(history.position("rubac.snapshot.b"), Some(HistoryPosition::Snapshot));
        assert_eq!(history.get(2), Some("rubac.snapshot.a"));
    }

    #[test]
    fn test_prune_numbered_slot_shifts_chain() {
        let (_temp, mut store, client_dir) =
            setup(&["rubac.2024-01-03", "rubac.2024-01-02", "rubac.2024-01-01"]);

        let report = prune(
            &mut store,
            "esme",
            &client_dir,
            &Selector::Slot(1),
            &InterruptMonitor::detached(),
            false,
        )
        .unwrap();

        assert_eq!(report.generation, "rubac.2024-01-02");
        assert!(report.removed);
        assert!(!client_dir.join("rubac.2024-01-02").exists());
        assert_eq!(store.get_incremental("esme", 0), "rubac.2024-01-03");
        assert_eq!(store.get_incremental("esme", 1), "rubac.2024-01-01");
        assert_eq!(store.get_incremental("esme", 2), "");
    }

    #[test]
    fn test_prune_snapshot_leaves_slots() {
        let (_temp, mut store, client_dir) = setup(&["rubac.2024-01-01"]);
        fs::create_dir_all(client_dir.join("rubac.snapshot.x")).unwrap();

        let report = prune(
            &mut store,
            "esme",
            &client_dir,
            &Selector::Name("rubac.snapshot.x".into()),
            &InterruptMonitor::detached(),
            false,
        )
        .unwrap();

        assert_eq!(report.position, HistoryPosition::Snapshot);
        assert!(!client_dir.join("rubac.snapshot.x").exists());
        assert_eq!(store.get_incremental("esme", 0), "rubac.2024-01-01");
    }

    #[test]
    fn test_prune_oldest_stops_at_a_slot_gap() {
        let (_temp, mut store, client_dir) = setup(&["rubac.2024-01-04", "rubac.2024-01-03"]);
        store.set_incremental("esme", 3, "rubac.2024-01-01");
        fs::create_dir_all(client_dir.join("rubac.2024-01-01")).unwrap();

        let report = prune(
            &mut store,
            "esme",
            &client_dir,
            &Selector::Oldest,
            &InterruptMonitor::detached(),
            false,
        )
        .unwrap();

        assert_eq!(report.position, HistoryPosition::Slot(1));
        assert!(!client_dir.join("rubac.2024-01-03").exists());
        assert!(client_dir.join("rubac.2024-01-01").exists());
        assert_eq!(store.get_incremental("esme", 0), "rubac.2024-01-04");
    }

    #[test]
    fn test_prune_dry_run_changes_nothing() {
        let (_temp, mut store, client_dir) = setup(&["rubac.2024-01-02", "rubac.2024-01-01"]);

        prune(
            &mut store,
            "esme",
            &client_dir,
            &Selector::Oldest,
            &InterruptMonitor::detached(),
            true,
        )
        .unwrap();

        assert!(client_dir.join("rubac.2024-01-01").exists());
        assert_eq!(store.get_incremental("esme", 1), "rubac.2024-01-01");
    }

    #[test]
    fn test_prune_unknown_name_is_not_found() {
        let (_temp, mut store, client_dir) = setup(&["rubac.2024-01-01"]);
        let err = prune(
            &mut store,
            "esme",
            &client_dir,
            &Selector::Name("rubac.1999-01-01".into()),
            &InterruptMonitor::detached(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, BackupError::NotFound(_)));
    }

    #[test]
    fn test_generation_usage_counts_files_and_bytes() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("home/steeve")).unwrap();
        fs::write(temp.path().join("home/steeve/a"), b"12345").unwrap();
        fs::write(temp.path().join("home/steeve/b"), b"12").unwrap();

        let usage = generation_usage(temp.path());

        assert_eq!(usage, GenerationUsage { files: 2, dirs: 2, bytes: 7 });
    }
}
