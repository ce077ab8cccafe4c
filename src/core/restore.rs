/*
 * Restoring files out of a backup generation with the sync tool's restore mode.
 *
 * The file list either comes from the command line (written to a scratch file)
 * or from an operator-supplied list file, which is validated first: comment
 * lines and relative entries are dropped with a warning.
 */
use super::clock::{self, ClockOperations, DATE_FORMAT, TIME_SUFFIX_FORMAT};
use super::config_store::ConfigStore;
use super::error::{BackupError, Result};
use super::generations::GenerationTable;
use super::selector::Selector;
use super::signals::InterruptMonitor;
use super::sync_tool::{self, SyncToolOperations};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreList {
    Paths(Vec<String>),
    FromFile(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub client: String,
    pub source: Option<Selector>,
    // `[host:]path`; defaults to `<work_dir>/<client>`.
    pub target: Option<String>,
    pub list: RestoreList,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub generation: String,
    pub destination: String,
    pub files: usize,
}

/// Comma-split and trimmed; empty pieces vanish.
pub fn split_paths<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.as_ref().split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn read_restore_file(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| BackupError::io(path.display().to_string(), e))?;
    let mut entries = Vec::new();
    // A line may hold several comma separated paths.
    for (number, raw) in text.lines().enumerate() {
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if entry.starts_with('#') {
                log::warn!("Restore: {}:{}: skipping comment", path.display(), number + 1);
                continue;
            }
            if !entry.starts_with('/') {
                log::warn!(
                    "Restore: {}:{}: skipping relative path '{entry}'",
                    path.display(),
                    number + 1
                );
                continue;
            }
            entries.push(entry.to_string());
        }
    }
    if entries.is_empty() {
        return Err(BackupError::Precondition(format!(
            "restore list {} holds no usable paths",
            path.display()
        )));
    }
    Ok(entries)
}

/// A bare path restores to the client itself when the client is remote.
pub fn restore_destination(target: Option<&str>, client: &str, address: &str, work_dir: &Path) -> String {
    let path = match target.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) if t.contains(':') => return t.to_string(),
        Some(t) => t.to_string(),
        None => work_dir.join(client).display().to_string(),
    };
    if sync_tool::is_local_address(address) {
        path
    } else {
        format!("{address}:{path}")
    }
}

fn write_list_file(work_dir: &Path, clock: &dyn ClockOperations, client: &str, entries: &[String]) -> Result<PathBuf> {
    fs::create_dir_all(work_dir).map_err(|e| BackupError::io(work_dir.display().to_string(), e))?;
    let now = clock.now();
    let path = work_dir.join(format!(
        "rubac.restore_from.{client}.{}_{}.dat",
        clock::format_with(now, DATE_FORMAT),
        clock::format_with(now, TIME_SUFFIX_FORMAT)
    ));
    let mut body = entries.join("\n");
    body.push('\n');
    fs::write(&path, body).map_err(|e| BackupError::io(path.display().to_string(), e))?;
    Ok(path)
}

pub struct RestoreController<'a> {
    pub tool: &'a dyn SyncToolOperations,
    pub clock: &'a dyn ClockOperations,
    pub interrupts: &'a InterruptMonitor,
    pub dest: &'a Path,
    pub work_dir: &'a Path,
}

impl RestoreController<'_> {
    pub fn restore(&self, store: &ConfigStore, request: &RestoreRequest) -> Result<RestoreReport> {
        let client = request.client.as_str();
        let table = GenerationTable::new(store.incrementals(client), store.client_ninc(client));
        let generation = match &request.source {
            Some(selector) => selector.resolve(client, &table)?,
            None => store.get_incremental(client, 0),
        };
        if generation.is_empty() {
            return Err(BackupError::NotFound(format!(
                "nothing to restore for client '{client}'"
            )));
        }
        let source_root = super::destination::client_dir(self.dest, store.profile(), client).join(&generation);
        if !source_root.is_dir() {
            return Err(BackupError::NotFound(format!(
                "backup {} not found",
                source_root.display()
            )));
        }

        let entries = match &request.list {
            RestoreList::Paths(paths) => split_paths(paths),
            RestoreList::FromFile(path) => read_restore_file(path)?,
        };
        if entries.is_empty() {
            return Err(BackupError::Precondition("no files given to restore".to_string()));
        }
        let destination = restore_destination(
            request.target.as_deref(),
            client,
            &store.client_address(client),
            self.work_dir,
        );
        if !destination.contains(':') {
            fs::create_dir_all(&destination).map_err(|e| BackupError::io(destination.clone(), e))?;
        }
        let list_file = write_list_file(self.work_dir, self.clock, client, &entries)?;
        log::info!(
            "Restore: {client}: {} path(s) from '{generation}' to {destination}",
            entries.len()
        );

        // Trailing slash: copy the generation's contents, not the directory itself.
        let source = PathBuf::from(format!("{}/", source_root.display()));
        let args = sync_tool::restore_args(request.dry_run, &list_file, &source, &destination);
        let guard = self.interrupts.guard();
        let status = self.tool.run(&args, &mut |line: &str| log::info!("{line}"));
        let interrupted = self.interrupts.is_interrupted();
        drop(guard);
        if let Err(e) = fs::remove_file(&list_file) {
            log::warn!("Restore: failed to remove {list_file:?}: {e}");
        }

        match status? {
            _ if interrupted => Err(BackupError::Interrupted(client.to_string())),
            0 => Ok(RestoreReport {
                generation,
                destination,
                files: entries.len(),
            }),
            code => Err(BackupError::SyncFailed {
                client: client.to_string(),
                code,
            }),
        }
    }
}
