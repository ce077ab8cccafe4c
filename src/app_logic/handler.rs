use super::bootstrap::{self, Console};
use super::report;
use super::settings::{self, Settings};
use super::texts;
use crate::core::clock::ClockOperations;
use crate::core::config_store::ConfigStore;
use crate::core::destination;
use crate::core::error::{BackupError, Result};
use crate::core::generations::GenerationTable;
use crate::core::history::{self, History};
use crate::core::manifest::ManifestStoreOperations;
use crate::core::models::ConfigVersion;
use crate::core::notifier::{MessageBuffer, NotifierOperations};
use crate::core::profiles::ProfileManagerOperations;
use crate::core::restore::{RestoreController, RestoreList, RestoreRequest};
use crate::core::run_controller::{RunController, RunMode, RunRequest};
use crate::core::search::{self, SearchRequest};
use crate::core::selector::Selector;
use crate::core::signals::InterruptMonitor;
use crate::core::sync_tool::{self, SyncToolOperations};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // No command: only apply settings.
    Configure,
    Run,
    Update,
    Snapshot(String),
    List { compact: bool },
    History { index: Option<usize> },
    Search(Vec<String>),
    Prune,
    Restore,
    Version,
    Help,
    Examples,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Configure,
    Run,
    Update,
    Snapshot,
    List,
    History,
    Search,
    Prune,
    Restore,
    Version,
    Help,
    Examples,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Configure => CommandKind::Configure,
            Command::Run => CommandKind::Run,
            Command::Update => CommandKind::Update,
            Command::Snapshot(_) => CommandKind::Snapshot,
            Command::List { .. } => CommandKind::List,
            Command::History { .. } => CommandKind::History,
            Command::Search(_) => CommandKind::Search,
            Command::Prune => CommandKind::Prune,
            Command::Restore => CommandKind::Restore,
            Command::Version => CommandKind::Version,
            Command::Help => CommandKind::Help,
            Command::Examples => CommandKind::Examples,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommandKind::Configure => "configure",
            CommandKind::Run => "run",
            CommandKind::Update => "update",
            CommandKind::Snapshot => "snapshot",
            CommandKind::List => "list",
            CommandKind::History => "history",
            CommandKind::Search => "search",
            CommandKind::Prune => "prune",
            CommandKind::Restore => "restore",
            CommandKind::Version => "version",
            CommandKind::Help => "help",
            CommandKind::Examples => "examples",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    // `Some(empty)` restores the hits of a search.
    pub paths: Option<Vec<String>>,
    pub from_file: Option<PathBuf>,
    pub to: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub profile: String,
    pub command: Command,
    pub clients: Vec<String>,
    pub settings: Settings,
    pub selector: Option<Selector>,
    pub restore: RestoreOptions,
    pub dry_run: bool,
    pub verbose: bool,
}

impl Invocation {
    pub fn new(profile: &str, command: Command) -> Self {
        Invocation {
            profile: profile.to_string(),
            command,
            clients: Vec::new(),
            settings: Settings::default(),
            selector: None,
            restore: RestoreOptions::default(),
            dry_run: false,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExitStatus {
    #[default]
    Success,
    ClientFailed,
    Fatal,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::ClientFailed => 1,
            ExitStatus::Fatal => 2,
        }
    }
}

#[derive(Debug, Default)]
pub struct Outcome {
    pub lines: Vec<String>,
    pub exit: ExitStatus,
}

type GlobalHandler = fn(&mut BackupApp, &Invocation) -> Result<Vec<String>>;
type ClientHandler = fn(&mut BackupApp, &Invocation, &str, &Path) -> Result<Vec<String>>;

#[derive(Clone, Copy)]
enum Handler {
    Global(GlobalHandler),
    PerClient {
        prelude: Option<GlobalHandler>,
        each: ClientHandler,
    },
}

#[derive(Clone, Copy)]
struct CommandSpec {
    kind: CommandKind,
    handler: Handler,
    needs_profile: bool,
    // Checked before any client is touched.
    needs_tool: bool,
    needs_destination: bool,
    // Without `--client`, run over every configured client.
    all_clients: bool,
    notifies: bool,
}

const fn spec(kind: CommandKind, handler: Handler) -> CommandSpec {
    CommandSpec {
        kind,
        handler,
        needs_profile: true,
        needs_tool: false,
        needs_destination: false,
        all_clients: false,
        notifies: false,
    }
}

const fn backup_spec(kind: CommandKind, each: ClientHandler) -> CommandSpec {
    CommandSpec {
        needs_tool: true,
        needs_destination: true,
        notifies: true,
        ..spec(kind, Handler::PerClient { prelude: None, each })
    }
}

const fn static_spec(kind: CommandKind, handler: GlobalHandler) -> CommandSpec {
    CommandSpec {
        needs_profile: false,
        ..spec(kind, Handler::Global(handler))
    }
}

static COMMANDS: [CommandSpec; 12] = [
    spec(CommandKind::Configure, Handler::Global(BackupApp::configure)),
    backup_spec(CommandKind::Run, BackupApp::run_client),
    backup_spec(CommandKind::Update, BackupApp::run_client),
    backup_spec(CommandKind::Snapshot, BackupApp::run_client),
    CommandSpec {
        all_clients: true,
        ..spec(
            CommandKind::List,
            Handler::PerClient {
                prelude: Some(BackupApp::list_globals),
                each: BackupApp::list_client,
            },
        )
    },
    CommandSpec {
        all_clients: true,
        ..spec(
            CommandKind::History,
            Handler::PerClient {
                prelude: None,
                each: BackupApp::history_client,
            },
        )
    },
    CommandSpec {
        all_clients: true,
        ..spec(
            CommandKind::Search,
            Handler::PerClient {
                prelude: None,
                each: BackupApp::search_client,
            },
        )
    },
    CommandSpec {
        needs_tool: false,
        ..backup_spec(CommandKind::Prune, BackupApp::prune_client)
    },
    backup_spec(CommandKind::Restore, BackupApp::restore_client),
    static_spec(CommandKind::Version, BackupApp::version),
    static_spec(CommandKind::Help, BackupApp::help),
    static_spec(CommandKind::Examples, BackupApp::examples),
];

fn command_spec(kind: CommandKind) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.kind == kind)
}

pub struct AppServices {
    pub profile_manager: Arc<dyn ProfileManagerOperations>,
    pub tool: Arc<dyn SyncToolOperations>,
    pub manifests: Arc<dyn ManifestStoreOperations>,
    pub clock: Arc<dyn ClockOperations>,
    pub notifier: Arc<dyn NotifierOperations>,
    pub interrupts: InterruptMonitor,
}

/*
 * Executes one parsed invocation: loads (or bootstraps) the profile, applies the
 * configuration switches, and dispatches the command through the static table.
 * Batch commands process clients one after another; a failing client is logged
 * and recorded for the notification digest while the batch moves on, unless the
 * error is fatal or the operator interrupted the run.
 */
pub struct BackupApp {
    pub(crate) store: ConfigStore,
    pub(crate) tool: Arc<dyn SyncToolOperations>,
    pub(crate) manifests: Arc<dyn ManifestStoreOperations>,
    pub(crate) clock: Arc<dyn ClockOperations>,
    pub(crate) notifier: Arc<dyn NotifierOperations>,
    pub(crate) interrupts: InterruptMonitor,
    pub(crate) work_dir: PathBuf,
    pub(crate) messages: MessageBuffer,
    pub(crate) console: Option<Console>,
    pub(crate) settings_changed: bool,
}

impl BackupApp {
    pub fn new(data_dir: &Path, work_dir: &Path, services: AppServices) -> Self {
        BackupApp {
            store: ConfigStore::new(data_dir, services.profile_manager),
            tool: services.tool,
            manifests: services.manifests,
            clock: services.clock,
            notifier: services.notifier,
            interrupts: services.interrupts,
            work_dir: work_dir.to_path_buf(),
            messages: MessageBuffer::new(),
            console: None,
            settings_changed: false,
        }
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = Some(console);
        self
    }

    pub fn execute(&mut self, inv: &Invocation) -> Outcome {
        let mut outcome = Outcome::default();
        let Some(spec) = command_spec(inv.command.kind()) else {
            log::error!("AppLogic: No handler registered for '{}'", inv.command.kind());
            outcome.exit = ExitStatus::Fatal;
            return outcome;
        };
        log::debug!("AppLogic: Executing '{}' for profile '{}'", spec.kind, inv.profile);

        if spec.needs_profile
            && let Err(e) = self.prepare(inv)
        {
            log::error!("AppLogic: {e}");
            outcome.exit = if e.is_fatal() {
                ExitStatus::Fatal
            } else {
                ExitStatus::ClientFailed
            };
            return outcome;
        }

        match spec.handler {
            Handler::Global(handler) => match handler(self, inv) {
                Ok(lines) => outcome.lines = lines,
                Err(e) => {
                    log::error!("AppLogic: {e}");
                    outcome.exit = if e.is_fatal() {
                        ExitStatus::Fatal
                    } else {
                        ExitStatus::ClientFailed
                    };
                }
            },
            Handler::PerClient { prelude, each } => {
                self.run_batch(spec, inv, prelude, each, &mut outcome);
            }
        }
        outcome
    }

    /*
     * Loads the profile, offering the interactive bootstrap when it does not
     * exist, then applies the settings of the invocation and persists once.
     */
    fn prepare(&mut self, inv: &Invocation) -> Result<()> {
        if !self.store.load(&inv.profile)? {
            match self.console.as_mut() {
                Some(console) => {
                    let created = bootstrap::bootstrap_profile(
                        &mut self.store,
                        console.input.as_mut(),
                        console.output.as_mut(),
                    )?;
                    if !created {
                        return Err(BackupError::Precondition(format!(
                            "profile '{}' does not exist",
                            inv.profile
                        )));
                    }
                }
                None => log::info!("AppLogic: Starting new profile '{}'.", inv.profile),
            }
        }

        self.settings_changed = settings::apply(&mut self.store, &inv.settings, &inv.clients)?;
        if self.settings_changed {
            if inv.dry_run {
                log::info!("AppLogic: Dry run, profile '{}' not saved.", inv.profile);
            } else {
                self.store.save()?;
            }
        }
        Ok(())
    }

    fn batch_clients(&self, spec: &CommandSpec, inv: &Invocation) -> Result<Vec<String>> {
        if !inv.clients.is_empty() {
            return Ok(inv.clients.clone());
        }
        if spec.all_clients {
            return Ok(self.store.client_ids());
        }
        Err(BackupError::Precondition(format!(
            "no client given for '{}'",
            spec.kind
        )))
    }

    fn run_batch(
        &mut self,
        spec: &CommandSpec,
        inv: &Invocation,
        prelude: Option<GlobalHandler>,
        each: ClientHandler,
        outcome: &mut Outcome,
    ) {
        let clients = match self.batch_clients(spec, inv) {
            Ok(clients) => clients,
            Err(e) => {
                log::error!("AppLogic: {e}");
                outcome.exit = ExitStatus::Fatal;
                return;
            }
        };
        if spec.needs_tool
            && let Err(e) = sync_tool::check_version(self.tool.as_ref())
        {
            log::error!("AppLogic: {e}");
            outcome.exit = ExitStatus::Fatal;
            return;
        }
        let dest = if spec.needs_destination {
            destination::check(&self.store.globals().dest).map_err(|e| e.to_string())
        } else {
            Ok(PathBuf::from(self.store.globals().dest.trim()))
        };

        if let Some(prelude) = prelude {
            match prelude(self, inv) {
                Ok(lines) => outcome.lines.extend(lines),
                Err(e) => log::error!("AppLogic: {e}"),
            }
        }

        let mut failed = 0usize;
        for client in &clients {
            self.messages.set_client(Some(client));
            let result = match &dest {
                Ok(dest) => each(self, inv, client, dest),
                Err(msg) => Err(BackupError::Precondition(msg.clone())),
            };
            match result {
                Ok(lines) => outcome.lines.extend(lines),
                Err(e) => {
                    failed += 1;
                    log::error!("AppLogic: {client}: {e}");
                    self.messages.push(format!("{} failed: {e}", spec.kind));
                    if e.is_fatal() {
                        outcome.exit = ExitStatus::Fatal;
                        break;
                    }
                    if matches!(e, BackupError::Interrupted(_)) {
                        log::warn!("AppLogic: Interrupted, skipping remaining clients.");
                        break;
                    }
                }
            }
        }
        self.messages.set_client(None);
        if failed > 0 && outcome.exit == ExitStatus::Success {
            outcome.exit = ExitStatus::ClientFailed;
        }
        self.notify(spec, inv, failed);
    }

    fn notify(&mut self, spec: &CommandSpec, inv: &Invocation, failed: usize) {
        let recipient = self.store.globals().email.trim().to_string();
        if !spec.notifies || recipient.is_empty() || inv.dry_run {
            self.messages.clear();
            return;
        }
        let status = if failed == 0 { "ok" } else { "FAILED" };
        let subject = format!("rubac {} {}: {status}", inv.profile, spec.kind);
        if let Err(e) = self
            .messages
            .flush(&recipient, &subject, self.notifier.as_ref())
        {
            log::warn!("AppLogic: {e}");
        }
    }

    fn configure(&mut self, inv: &Invocation) -> Result<Vec<String>> {
        if !self.settings_changed {
            log::warn!("AppLogic: Nothing to configure.");
            return Ok(Vec::new());
        }
        let path = self.store.profile_file_path()?;
        let state = if inv.dry_run { "not saved (dry run)" } else { "saved" };
        Ok(vec![format!("profile '{}' {state}: {}", inv.profile, path.display())])
    }

    fn run_client(&mut self, inv: &Invocation, client: &str, dest: &Path) -> Result<Vec<String>> {
        let mode = match &inv.command {
            Command::Update => RunMode::Update,
            Command::Snapshot(label) => RunMode::Snapshot(label.clone()),
            _ => RunMode::Full,
        };
        let request = RunRequest {
            base: inv.selector.clone(),
            dry_run: inv.dry_run,
            compress: inv.settings.compress == Some(true),
            verbose: inv.verbose,
            ..RunRequest::new(client, mode)
        };
        let controller = RunController {
            tool: self.tool.as_ref(),
            manifests: self.manifests.as_ref(),
            clock: self.clock.as_ref(),
            interrupts: &self.interrupts,
            dest,
            work_dir: &self.work_dir,
        };
        let report = controller.run(&mut self.store, &request)?;

        let mut details = vec![format!("{} -> {}", request.mode, report.generation)];
        if let Some(expired) = &report.expired {
            details.push(format!("expired {}", expired.display()));
        }
        if !report.truncated_slots.is_empty() {
            details.push(format!(
                "history truncated at slot(s) {:?}",
                report.truncated_slots
            ));
        }
        details.extend(report.summary.iter().cloned());
        for line in &details {
            self.messages.push(line.clone());
        }
        Ok(details.into_iter().map(|line| format!("{client}: {line}")).collect())
    }

    fn list_globals(&mut self, inv: &Invocation) -> Result<Vec<String>> {
        let compact = matches!(inv.command, Command::List { compact: true });
        Ok(report::render_globals(&self.store, compact))
    }

    fn list_client(&mut self, inv: &Invocation, client: &str, _dest: &Path) -> Result<Vec<String>> {
        let compact = matches!(inv.command, Command::List { compact: true });
        Ok(report::render_client(&self.store, client, compact))
    }

    fn client_history(&self, client: &str, dest: &Path) -> Result<(PathBuf, GenerationTable, History)> {
        let client_dir = destination::client_dir(dest, self.store.profile(), client);
        let table = GenerationTable::new(self.store.incrementals(client), self.store.client_ninc(client));
        let history = History::collect(&table, &client_dir, self.store.profile())?;
        Ok((client_dir, table, history))
    }

    fn history_client(&mut self, inv: &Invocation, client: &str, dest: &Path) -> Result<Vec<String>> {
        let (client_dir, _, history) = self.client_history(client, dest)?;
        if history.is_empty() {
            return Ok(vec![format!("{client}: no backups")]);
        }
        if let Command::History { index: Some(index) } = inv.command {
            let name = history.get(index).ok_or_else(|| {
                BackupError::NotFound(format!("no backup at history index {index} for client '{client}'"))
            })?;
            let generation_dir = client_dir.join(name);
            let manifest = self.manifests.load(&generation_dir)?;
            let mut lines = vec![format!("{client}:{index}: {name}")];
            lines.extend(manifest.paths().iter().map(|p| format!("    {p}")));
            return Ok(lines);
        }
        let usage: Vec<_> = history
            .entries()
            .map(|name| {
                let dir = client_dir.join(name);
                (inv.verbose && dir.is_dir()).then(|| history::generation_usage(&dir))
            })
            .collect();
        Ok(report::render_history(client, &history, &usage))
    }

    fn search_client(&mut self, inv: &Invocation, client: &str, dest: &Path) -> Result<Vec<String>> {
        let Command::Search(patterns) = &inv.command else {
            return Ok(Vec::new());
        };
        let (client_dir, table, history) = self.client_history(client, dest)?;
        let generations: Vec<String> = match &inv.selector {
            Some(selector) => vec![selector.resolve(client, &table)?],
            None => history.entries().map(str::to_string).collect(),
        };
        let results = search::search(
            self.manifests.as_ref(),
            &client_dir,
            &SearchRequest {
                patterns,
                generations: &generations,
                verbose: inv.verbose,
            },
        )?;
        let mut lines = report::render_search(client, &results);

        if inv.restore.paths.as_ref().is_some_and(Vec::is_empty) {
            let hits = search::restore_list(&results);
            if hits.is_empty() {
                log::warn!("AppLogic: {client}: no search hits to restore");
            } else {
                sync_tool::check_version(self.tool.as_ref())?;
                let dest = destination::check(&self.store.globals().dest)?;
                lines.extend(self.restore_paths(inv, client, &dest, RestoreList::Paths(hits))?);
            }
        }
        Ok(lines)
    }

    fn prune_client(&mut self, inv: &Invocation, client: &str, dest: &Path) -> Result<Vec<String>> {
        let selector = inv
            .selector
            .as_ref()
            .ok_or_else(|| BackupError::Precondition("prune needs a selector".to_string()))?;
        let client_dir = destination::client_dir(dest, self.store.profile(), client);
        let report = history::prune(
            &mut self.store,
            client,
            &client_dir,
            selector,
            &self.interrupts,
            inv.dry_run,
        )?;
        let line = if report.removed {
            format!("{client}: pruned {}", report.generation)
        } else {
            format!("{client}: {} not removed", report.generation)
        };
        self.messages.push(line.clone());
        Ok(vec![line])
    }

    fn restore_client(&mut self, inv: &Invocation, client: &str, dest: &Path) -> Result<Vec<String>> {
        let list = match (&inv.restore.from_file, &inv.restore.paths) {
            (Some(file), _) => RestoreList::FromFile(file.clone()),
            (None, Some(paths)) if !paths.is_empty() => RestoreList::Paths(paths.clone()),
            _ => {
                return Err(BackupError::Precondition(
                    "nothing to restore: give paths or a restore list file".to_string(),
                ));
            }
        };
        self.restore_paths(inv, client, dest, list)
    }

    fn restore_paths(&mut self, inv: &Invocation, client: &str, dest: &Path, list: RestoreList) -> Result<Vec<String>> {
        let controller = RestoreController {
            tool: self.tool.as_ref(),
            clock: self.clock.as_ref(),
            interrupts: &self.interrupts,
            dest,
            work_dir: &self.work_dir,
        };
        let report = controller.restore(
            &self.store,
            &RestoreRequest {
                client: client.to_string(),
                source: inv.selector.clone(),
                target: inv.restore.to.clone(),
                list,
                dry_run: inv.dry_run,
            },
        )?;
        let line = format!(
            "{client}: restored {} path(s) from {} to {}",
            report.files, report.generation, report.destination
        );
        self.messages.push(line.clone());
        Ok(vec![line])
    }

    fn version(&mut self, _inv: &Invocation) -> Result<Vec<String>> {
        Ok(vec![format!("rubac {}", ConfigVersion::current())])
    }

    fn help(&mut self, _inv: &Invocation) -> Result<Vec<String>> {
        Ok(texts::HELP_TEXT.lines().map(str::to_string).collect())
    }

    fn examples(&mut self, _inv: &Invocation) -> Result<Vec<String>> {
        Ok(texts::EXAMPLES_TEXT.lines().map(str::to_string).collect())
    }
}
