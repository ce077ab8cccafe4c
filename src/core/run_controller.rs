/*
 * The per-client run lifecycle:
 *
 *   Idle -> LockAcquired -> GenerationSelected -> Syncing -> Committed | RolledBack -> Unlocked
 *
 * A run takes the client's run lock (failing fast if it is held), picks the target
 * and link generations for the requested mode, streams the sync tool's output into
 * the target's manifest, and then either commits (expire the oldest generation,
 * record the new one in slot 0, persist config and manifest) or rolls back (delete
 * a freshly created target, leave config and manifest untouched). The lock guard is
 * released on every path out of the run, including interrupts and early errors.
 */
use super::clock::ClockOperations;
use super::config_store::{ConfigKey, ConfigStore};
use super::destination;
use super::error::{BackupError, Result};
use super::generations::{self, GenerationTable, Rotation};
use super::manifest::{Manifest, ManifestStoreOperations, OutputClassifier, OutputLine};
use super::ring_buffer::OutputTail;
use super::run_lock::RunLock;
use super::selector::Selector;
use super::signals::InterruptMonitor;
use super::sync_tool::{self, BackupArgs, SyncToolOperations};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Full,
    Update,
    Snapshot(String),
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Full => write!(f, "run"),
            RunMode::Update => write!(f, "update"),
            RunMode::Snapshot(label) => write!(f, "snapshot {label}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    LockAcquired,
    GenerationSelected,
    Syncing,
    Committed,
    RolledBack,
    Unlocked,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub client: String,
    pub mode: RunMode,
    // Base generation for snapshots; slot 0 when absent.
    pub base: Option<Selector>,
    pub dry_run: bool,
    // Forces the compress flag on top of the stored setting.
    pub compress: bool,
    pub verbose: bool,
}

impl RunRequest {
    pub fn new(client: &str, mode: RunMode) -> Self {
        RunRequest {
            client: client.to_string(),
            mode,
            base: None,
            dry_run: false,
            compress: false,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub client: String,
    pub generation: String,
    pub target: PathBuf,
    pub link_dest: Option<PathBuf>,
    pub expired: Option<PathBuf>,
    pub truncated_slots: Vec<u32>,
    pub manifest_len: usize,
    pub summary: Vec<String>,
    pub states: Vec<RunState>,
}

// Target and link generations for one run, as chosen before syncing.
struct Selection {
    name: String,
    target: PathBuf,
    link_dest: Option<PathBuf>,
    fresh: bool,
    table: GenerationTable,
    rotation: Rotation,
}

pub struct RunController<'a> {
    pub tool: &'a dyn SyncToolOperations,
    pub manifests: &'a dyn ManifestStoreOperations,
    pub clock: &'a dyn ClockOperations,
    pub interrupts: &'a InterruptMonitor,
    pub dest: &'a Path,
    // Scratch space for exclude lists.
    pub work_dir: &'a Path,
}

impl RunController<'_> {
    /// Backs up one client in the requested mode: a rotating run, an in-place
    /// update of the newest generation, or a named snapshot. Holds the client's
    /// run lock throughout and persists the generation table only on success.
    pub fn run(&self, store: &mut ConfigStore, request: &RunRequest) -> Result<RunReport> {
        let client = request.client.as_str();
        let mut report = RunReport {
            client: client.to_string(),
            states: vec![RunState::Idle],
            ..Default::default()
        };

        let includes = store.client_key_list(client, ConfigKey::Includes);
        if includes.is_empty() {
            log::error!("RunController: {client}: nothing included in backup");
            return Err(BackupError::Precondition(format!(
                "nothing included in backup for client '{client}'"
            )));
        }

        if let RunMode::Snapshot(label) = &request.mode
            && !generations::is_valid_snapshot_label(label)
        {
            return Err(BackupError::Precondition(format!(
                "invalid snapshot label {label:?} for client '{client}'"
            )));
        }

        let client_dir = destination::ensure_client_dir(self.dest, store.profile(), client)?;
        let lock = RunLock::acquire(&client_dir)?;
        report.states.push(RunState::LockAcquired);

        let outcome = self.run_locked(store, request, &client_dir, &includes, &mut report);

        if let Err(e) = lock.release() {
            log::warn!("RunController: {client}: failed to remove run lock: {e}");
        }
        report.states.push(RunState::Unlocked);
        log::debug!("RunController: {client}: states {:?}", report.states);
        outcome.map(|()| report)
    }

    fn select(
        &self,
        store: &ConfigStore,
        request: &RunRequest,
        client_dir: &Path,
    ) -> Result<Selection> {
        let client = request.client.as_str();
        let profile = store.profile();
        let mut table = GenerationTable::new(store.incrementals(client), store.client_ninc(client));
        let existing = |name: &str| {
            Some(client_dir.join(name)).filter(|p| !name.is_empty() && p.exists())
        };

        let (name, link_dest, rotation) = match &request.mode {
            RunMode::Snapshot(label) => {
                let base = match &request.base {
                    Some(selector) => selector.resolve(client, &table)?,
                    None => table.get(0).to_string(),
                };
                let Some(link) = existing(&base) else {
                    return Err(BackupError::Precondition(format!(
                        "run one backup of client '{client}' before doing a snapshot"
                    )));
                };
                (generations::snapshot_name(profile, label), Some(link), Rotation::default())
            }
            RunMode::Update => {
                let current = table.get(0).to_string();
                let name = if current.is_empty() {
                    generations::fresh_generation_name(profile, self.clock, client_dir)
                } else {
                    log::info!("RunController: {client}: running update on '{current}'");
                    current
                };
                (name, None, Rotation::default())
            }
            RunMode::Full if table.ninc() == 0 => {
                let current = table.get(0).to_string();
                let name = if current.is_empty() {
                    generations::fresh_generation_name(profile, self.clock, client_dir)
                } else {
                    current
                };
                (name, None, Rotation::default())
            }
            RunMode::Full => {
                let previous = table.get(0).to_string();
                let name = generations::fresh_generation_name(profile, self.clock, client_dir);
                let rotation = if previous.is_empty() {
                    Rotation::default()
                } else {
                    table.rotate(client_dir)
                };
                (name, existing(&previous), rotation)
            }
        };

        let target = client_dir.join(&name);
        let fresh = !target.exists();
        Ok(Selection {
            name,
            target,
            link_dest,
            fresh,
            table,
            rotation,
        })
    }

    fn run_locked(
        &self,
        store: &mut ConfigStore,
        request: &RunRequest,
        client_dir: &Path,
        includes: &[String],
        report: &mut RunReport,
    ) -> Result<()> {
        let client = request.client.as_str();
        let selection = self.select(store, request, client_dir)?;
        report.states.push(RunState::GenerationSelected);
        report.generation = selection.name.clone();
        report.target = selection.target.clone();
        report.link_dest = selection.link_dest.clone();
        report.truncated_slots = selection.rotation.truncated.clone();
        log::debug!(
            "RunController: {client}: target {:?} link {:?}",
            selection.target,
            selection.link_dest
        );

        fs::create_dir_all(&selection.target)
            .map_err(|e| BackupError::io(selection.target.display().to_string(), e))?;

        let exclude_file = self.write_excludes(store, client, &selection.name)?;
        let args = sync_tool::backup_args(&BackupArgs {
            opts: store.client_key_list(client, ConfigKey::Opts),
            compress: request.compress || store.client_compress(client),
            dry_run: request.dry_run,
            delete: request.mode != RunMode::Update,
            link_dest: selection.link_dest.clone(),
            exclude_from: exclude_file.clone(),
            sources: sync_tool::source_paths(includes, &store.client_address(client)),
            target: selection.target.clone(),
        });

        let mut manifest = self.manifests.load(&selection.target)?;
        let classifier = OutputClassifier::new(includes);
        let mut tail = OutputTail::default();
        let mut summary = Vec::new();

        report.states.push(RunState::Syncing);
        let guard = self.interrupts.guard();
        let status = self.tool.run(&args, &mut |line: &str| {
            tail.push(line);
            match manifest.apply_line(&classifier, line) {
                OutputLine::TransferSummary {
                    sent,
                    received,
                    rate,
                } => summary.push(format!(
                    "sent {sent} bytes, recv {received} bytes, rate {rate} bytes/sec"
                )),
                OutputLine::SizeSummary { total, speedup } => {
                    summary.push(format!("size {total}, speedup {speedup}"))
                }
                OutputLine::Deleted(path) if request.verbose => log::info!("Deleting {path}"),
                OutputLine::Synced(path) | OutputLine::Unchanged(path) if request.verbose => {
                    log::info!("{path}")
                }
                OutputLine::Other => log::debug!("$ {line}"),
                _ => log::trace!("{line}"),
            }
        });
        let interrupted = self.interrupts.is_interrupted();
        drop(guard);

        if let Some(path) = &exclude_file
            && let Err(e) = fs::remove_file(path)
        {
            log::warn!("RunController: failed to remove {path:?}: {e}");
        }
        report.summary = summary;
        report.manifest_len = manifest.len();

        let failure = match status {
            Ok(0) if !interrupted => None,
            Ok(code) if !interrupted => Some(BackupError::SyncFailed {
                client: client.to_string(),
                code,
            }),
            Ok(_) => Some(BackupError::Interrupted(client.to_string())),
            Err(e) => Some(BackupError::from(e)),
        };

        if let Some(err) = failure {
            log::error!("RunController: {client}: {err}");
            log::info!(" >>>> command output <<<<");
            for line in tail.lines() {
                log::info!(" >> {line}");
            }
            log::info!(" >>>>");
            if request.mode != RunMode::Update && selection.fresh {
                log::info!("RunController: {client}: deleting incomplete backup {:?}", selection.target);
                remove_tree(&selection.target);
                report.states.push(RunState::RolledBack);
            }
            return Err(err);
        }

        self.commit(store, request, selection, manifest, report)
    }

    fn commit(
        &self,
        store: &mut ConfigStore,
        request: &RunRequest,
        selection: Selection,
        manifest: Manifest,
        report: &mut RunReport,
    ) -> Result<()> {
        let client = request.client.as_str();
        let Selection {
            name,
            target,
            fresh,
            mut table,
            rotation,
            ..
        } = selection;

        if request.dry_run {
            if let Some(expire) = &rotation.expire {
                log::info!("RunController: {client}: dry run, would delete expired {expire:?}");
            }
            if fresh {
                remove_tree(&target);
            }
            report.states.push(RunState::Committed);
            return Ok(());
        }

        if let Some(expire) = &rotation.expire {
            log::info!("RunController: {client}: deleting expired incremental {expire:?}");
            remove_tree(expire);
            report.expired = Some(expire.clone());
        }
        if !matches!(request.mode, RunMode::Snapshot(_)) {
            table.set(0, &name);
        }
        store.replace_incrementals(client, table.into_slots());
        store.save()?;
        self.manifests.save(&target, &manifest)?;
        report.states.push(RunState::Committed);
        log::info!("RunController: {client}: committed '{name}' ({} manifest entries)", manifest.len());
        Ok(())
    }

    // `<work_dir>/<generation>.<client>.excl`, only when there is something to exclude.
    fn write_excludes(
        &self,
        store: &ConfigStore,
        client: &str,
        generation: &str,
    ) -> Result<Option<PathBuf>> {
        let excludes = store.client_key_list(client, ConfigKey::Excludes);
        if excludes.is_empty() {
            return Ok(None);
        }
        fs::create_dir_all(self.work_dir)
            .map_err(|e| BackupError::io(self.work_dir.display().to_string(), e))?;
        let path = self.work_dir.join(format!("{generation}.{client}.excl"));
        let mut body = excludes.join("\n");
        body.push('\n');
        fs::write(&path, body).map_err(|e| BackupError::io(path.display().to_string(), e))?;
        Ok(Some(path))
    }
}

fn remove_tree(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = fs::remove_dir_all(path) {
        log::error!("RunController: failed to delete {path:?}: {e}");
    }
}
