// src/main.rs

mod app_logic;
mod cli;
mod core;

use crate::app_logic::{AppServices, BackupApp, Console, ExitStatus};
use crate::cli::Cli;
use crate::core::{
    ClockOperations, CoreManifestStore, CoreProfileManager, CoreSyncTool, GlobalConfig,
    InterruptMonitor, LogNotifier, ProfileManagerOperations, SystemClock, clock, path_utils,
};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() {
    let cli = match Cli::parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                ExitStatus::Fatal.code()
            } else {
                ExitStatus::Success.code()
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    std::process::exit(run(&cli).code());
}

fn run(cli: &Cli) -> ExitStatus {
    let invocation = match cli.invocation() {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("rubac: {e}");
            return ExitStatus::Fatal;
        }
    };
    let Some(data_dir) = path_utils::resolve_data_dir(cli.datadir.as_deref()) else {
        eprintln!("rubac: no usable data directory, use --datadir or RUBAC_DATADIR");
        return ExitStatus::Fatal;
    };

    let profile_manager: Arc<dyn ProfileManagerOperations> = Arc::new(CoreProfileManager::new());
    let clock: Arc<dyn ClockOperations> = Arc::new(SystemClock::new());
    let globals = stored_globals(profile_manager.as_ref(), &data_dir, &invocation.profile);
    init_logging(cli, &invocation.profile, &globals, clock.as_ref());
    log::debug!(
        "Main: Profile '{}' in data directory {data_dir:?}",
        invocation.profile
    );

    let interrupts = InterruptMonitor::install().unwrap_or_else(|e| {
        log::warn!("Main: Could not install signal handlers: {e}");
        InterruptMonitor::detached()
    });
    let smtp = cli.smtp.clone().unwrap_or(globals.smtp);
    let services = AppServices {
        profile_manager,
        tool: Arc::new(CoreSyncTool::from_env()),
        manifests: Arc::new(CoreManifestStore::new()),
        clock,
        notifier: Arc::new(LogNotifier::new(&smtp)),
        interrupts,
    };

    let mut app = BackupApp::new(&data_dir, &path_utils::work_dir(), services);
    if io::stdin().is_terminal() {
        app = app.with_console(Console {
            input: Box::new(BufReader::new(io::stdin())),
            output: Box::new(io::stderr()),
        });
    }
    let outcome = app.execute(&invocation);

    let mut stdout = io::stdout().lock();
    for line in &outcome.lines {
        if writeln!(stdout, "{line}").is_err() {
            break;
        }
    }
    log::debug!("Main: Exit status {:?}", outcome.exit);
    outcome.exit
}

// Logging starts before the profile is loaded for real; a broken document is reported later.
fn stored_globals(
    profile_manager: &dyn ProfileManagerOperations,
    data_dir: &Path,
    profile: &str,
) -> GlobalConfig {
    match profile_manager.load_config(data_dir, profile) {
        Ok(Some(config)) => config.globals,
        _ => GlobalConfig::default(),
    }
}

fn log_file_path(cli: &Cli, profile: &str, globals: &GlobalConfig, clock: &dyn ClockOperations) -> PathBuf {
    let dir = path_utils::resolve_log_dir(cli.logdir.as_deref(), &globals.logdir);
    let name = [cli.logname.as_deref(), Some(globals.logname.as_str())]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{profile}.{}.log", clock::date_stamp(clock)));
    dir.join(name)
}

fn open_private_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn init_logging(cli: &Cli, profile: &str, globals: &GlobalConfig, clock: &dyn ClockOperations) {
    let console_level = if cli.quiet {
        LevelFilter::Warn
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        console_level,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    let path = log_file_path(cli, profile, globals, clock);
    let file_error = match open_private_log(&path) {
        Ok(file) => {
            loggers.push(WriteLogger::new(LevelFilter::Debug, config, file));
            None
        }
        Err(e) => Some(e),
    };
    if let Err(e) = CombinedLogger::init(loggers) {
        eprintln!("rubac: logging unavailable: {e}");
        return;
    }
    match file_error {
        None => log::debug!("Main: Logging to {path:?}"),
        Some(e) => log::warn!("Main: Cannot open log file {path:?} ({e}), logging to the console only"),
    }
}
