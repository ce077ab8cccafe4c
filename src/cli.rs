//! Command-line surface.
//!
//! Flags are declared with clap's derive macros. Commands are plain flags rather
//! than subcommands; when several are given, the one appearing first on the
//! command line wins and the others are reported and ignored.

use crate::app_logic::{Command, Invocation, RestoreOptions, Settings};
use crate::core::profiles::{self, DEFAULT_PROFILE_NAME, ProfileError};
use crate::core::selector::Selector;
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;

// Argument ids of the command flags, as derived from the field names.
const COMMAND_FLAGS: [&str; 12] = [
    "run",
    "update",
    "snapshot",
    "list",
    "history",
    "search",
    "prune",
    "restore",
    "restore_from",
    "version",
    "help",
    "examples",
];

/// Rendering of the `--list` command.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum ListStyle {
    /// One item per line.
    #[default]
    Full,
    /// `key='a,b'` on a single line.
    Compact,
}

/// Generation based incremental backups driven by rsync.
#[derive(Parser, Debug)]
#[command(name = "rubac")]
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    /// Back up the selected clients, rotating generations.
    #[arg(short = 'r', long)]
    pub run: bool,

    /// Re-sync into the newest generation in place.
    #[arg(short = 'u', long)]
    pub update: bool,

    /// Create a separately named snapshot generation.
    #[arg(short = 'S', long, value_name = "LABEL")]
    pub snapshot: Option<String>,

    /// List global and client settings.
    #[arg(short = 'L', long, value_enum, value_name = "STYLE", num_args = 0..=1, default_missing_value = "full")]
    pub list: Option<ListStyle>,

    /// List generations, or the manifest of the generation at INDEX.
    #[arg(short = 'H', long, value_name = "INDEX")]
    pub history: Option<Option<usize>>,

    /// Search the manifests for case-insensitive regular expressions.
    #[arg(short = 's', long, value_name = "PATTERN", num_args = 1..)]
    pub search: Vec<String>,

    /// Delete one generation.
    #[arg(short = 'P', long, value_name = "SELECTOR")]
    pub prune: Option<String>,

    /// Restore comma separated paths; without paths, restore the search hits.
    #[arg(short = 'R', long, value_name = "PATH", num_args = 0.., value_delimiter = ',')]
    pub restore: Option<Vec<String>>,

    /// Restore the absolute paths listed in FILE.
    #[arg(long, value_name = "FILE")]
    pub restore_from: Option<PathBuf>,

    /// Restore target, `[host:]path`.
    #[arg(long, value_name = "TARGET")]
    pub restore_to: Option<String>,

    /// Print the program version.
    #[arg(short = 'V', long)]
    pub version: bool,

    /// Print the help text.
    #[arg(short = 'h', long)]
    pub help: bool,

    /// Print usage examples.
    #[arg(long)]
    pub examples: bool,

    /// Generation to act on: a slot number, `newest`, `oldest` or a name.
    #[arg(short = 'b', long, value_name = "SELECTOR")]
    pub backup: Option<String>,

    /// Clients to act on (repeatable, comma separated).
    #[arg(short = 'c', long, value_name = "CLIENT", env = "RUBAC_CLIENT", value_delimiter = ',')]
    pub client: Vec<String>,

    /// Profile name or profile file.
    #[arg(short = 'p', long, env = "RUBAC_PROFILE", default_value = DEFAULT_PROFILE_NAME)]
    pub profile: String,

    /// Directory holding the profile documents.
    #[arg(long, value_name = "DIR")]
    pub datadir: Option<PathBuf>,

    /// Initialise and store the backup destination.
    #[arg(long, value_name = "PATH")]
    pub dest: Option<String>,

    /// Log directory (stored globally).
    #[arg(long, value_name = "DIR")]
    pub logdir: Option<String>,

    /// Log file name (stored globally).
    #[arg(long = "log", value_name = "NAME")]
    pub logname: Option<String>,

    /// Notification recipient.
    #[arg(long = "mail", value_name = "ADDRESS")]
    pub email: Option<String>,

    /// Mail relay host.
    #[arg(long, value_name = "HOST")]
    pub smtp: Option<String>,

    /// Paths to back up (comma separated).
    #[arg(short = 'i', long, value_name = "PATHS")]
    pub include: Vec<String>,

    /// Exclude patterns (comma separated).
    #[arg(short = 'x', long, value_name = "PATTERNS")]
    pub exclude: Vec<String>,

    /// Extra rsync options (space separated).
    #[arg(long, value_name = "OPTS", allow_hyphen_values = true)]
    pub opts: Vec<String>,

    /// Host to pull a client from.
    #[arg(short = 'a', long, value_name = "HOST")]
    pub address: Option<String>,

    /// Number of incremental generations to keep.
    #[arg(short = 'n', long, value_name = "N", allow_negative_numbers = true)]
    pub ninc: Option<i64>,

    /// Compress transfers.
    #[arg(long, overrides_with = "no_compress")]
    pub compress: bool,

    /// Do not compress transfers.
    #[arg(long, overrides_with = "compress")]
    pub no_compress: bool,

    /// Apply settings to the global scope instead of the clients.
    #[arg(short = 'g', long)]
    pub global: bool,

    /// Remove the given settings, or the clients themselves.
    #[arg(short = 'D', long)]
    pub delete: bool,

    /// Pass --dry-run to rsync and keep the profile untouched.
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Debug output and detailed listings.
    #[arg(short = 'v', long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Warnings and errors only.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    // Command flag ids in command-line order.
    #[arg(skip)]
    pub command_order: Vec<&'static str>,
}

fn given_on_command_line(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

impl Cli {
    pub fn parse_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = <Self as CommandFactory>::command().try_get_matches_from(args)?;
        let mut cli = Self::from_arg_matches(&matches)?;
        let mut order: Vec<(usize, &'static str)> = COMMAND_FLAGS
            .iter()
            .filter(|id| given_on_command_line(&matches, id))
            .map(|id| (matches.index_of(id).unwrap_or(usize::MAX), *id))
            .collect();
        order.sort();
        cli.command_order = order.into_iter().map(|(_, id)| id).collect();
        Ok(cli)
    }

    fn is_searching(&self) -> bool {
        self.command_order.contains(&"search")
    }

    fn command_for(&self, id: &str) -> Option<Command> {
        Some(match id {
            "run" => Command::Run,
            "update" => Command::Update,
            "snapshot" => Command::Snapshot(self.snapshot.clone()?),
            "list" => Command::List {
                compact: self.list == Some(ListStyle::Compact),
            },
            "history" => Command::History {
                index: self.history.flatten(),
            },
            "search" => Command::Search(self.search.clone()),
            "prune" => Command::Prune,
            "restore" | "restore_from" => Command::Restore,
            "version" => Command::Version,
            "help" => Command::Help,
            "examples" => Command::Examples,
            _ => return None,
        })
    }

    // With `--search`, `--restore` only says what to do with the hits.
    fn selected_command(&self) -> Command {
        let searching = self.is_searching();
        let mut candidates = self
            .command_order
            .iter()
            .filter(|id| !(searching && matches!(**id, "restore" | "restore_from")))
            .filter_map(|id| self.command_for(id).map(|command| (*id, command)));
        let Some((first, command)) = candidates.next() else {
            return Command::Configure;
        };
        for (ignored, _) in candidates {
            // `--restore` with `--restore-from` is one command.
            if matches!((first, ignored), ("restore", "restore_from") | ("restore_from", "restore")) {
                continue;
            }
            log::warn!("Cli: Only one command per invocation, ignoring --{}", ignored.replace('_', "-"));
        }
        command
    }

    fn clients(&self) -> Vec<String> {
        let mut clients: Vec<String> = Vec::new();
        for client in self.client.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            if !clients.iter().any(|known| known == client) {
                clients.push(client.to_string());
            }
        }
        clients
    }

    fn settings(&self) -> Settings {
        Settings {
            dest: self.dest.clone(),
            logdir: self.logdir.clone(),
            logname: self.logname.clone(),
            email: self.email.clone(),
            smtp: self.smtp.clone(),
            includes: self.include.clone(),
            excludes: self.exclude.clone(),
            opts: self.opts.clone(),
            address: self.address.clone(),
            ninc: self.ninc,
            compress: match (self.compress, self.no_compress) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            global: self.global,
            delete: self.delete,
        }
    }

    pub fn profile_name(&self) -> Result<String, ProfileError> {
        let name = profiles::profile_name_from_arg(&self.profile);
        if name.is_empty() {
            return Err(ProfileError::InvalidProfileName(self.profile.clone()));
        }
        Ok(name)
    }

    pub fn invocation(&self) -> Result<Invocation, ProfileError> {
        let command = self.selected_command();
        let selector = match (&command, &self.prune) {
            (Command::Prune, Some(prune)) => Some(prune),
            _ => self.backup.as_ref(),
        };
        let mut inv = Invocation::new(&self.profile_name()?, command);
        inv.clients = self.clients();
        inv.settings = self.settings();
        inv.selector = selector.and_then(|s| s.parse::<Selector>().ok());
        inv.restore = RestoreOptions {
            paths: self.restore.clone(),
            from_file: self.restore_from.clone(),
            to: self.restore_to.clone(),
        };
        inv.dry_run = self.dry_run;
        inv.verbose = self.verbose;
        Ok(inv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(args: &[&str]) -> Invocation {
        let argv = std::iter::once("rubac").chain(args.iter().copied());
        Cli::parse_args(argv).unwrap().invocation().unwrap()
    }

    #[test]
    fn test_no_command_configures() {
        let inv = invocation(&["--client", "esme", "--include", "/home/steeve,/etc", "--ninc", "2"]);

        assert_eq!(inv.command, Command::Configure);
        assert_eq!(inv.profile, DEFAULT_PROFILE_NAME);
        assert_eq!(inv.clients, vec!["esme"]);
        assert_eq!(inv.settings.includes, vec!["/home/steeve,/etc"]);
        assert_eq!(inv.settings.ninc, Some(2));
        assert_eq!(inv.settings.compress, None);
    }

    #[test]
    fn test_first_command_flag_wins() {
        let inv = invocation(&["--list", "compact", "--run", "-c", "esme"]);
        assert_eq!(inv.command, Command::List { compact: true });

        let inv = invocation(&["--run", "--list", "-c", "esme"]);
        assert_eq!(inv.command, Command::Run);
    }

    #[test]
    fn test_clients_are_split_and_deduplicated() {
        let inv = invocation(&["-c", "esme,hex", "--client", "esme", "-c", "vimes"]);
        assert_eq!(inv.clients, vec!["esme", "hex", "vimes"]);
    }

    #[test]
    fn test_history_with_and_without_index() {
        assert_eq!(invocation(&["--history"]).command, Command::History { index: None });
        assert_eq!(invocation(&["-H", "3"]).command, Command::History { index: Some(3) });
    }

    #[test]
    fn test_prune_value_is_the_selector() {
        let inv = invocation(&["-c", "esme", "--prune", "oldest"]);
        assert_eq!(inv.command, Command::Prune);
        assert_eq!(inv.selector, Some(Selector::Oldest));

        let inv = invocation(&["-c", "esme", "--history", "--backup", "2"]);
        assert_eq!(inv.selector, Some(Selector::Slot(2)));
    }

    #[test]
    fn test_restore_paths_are_comma_split() {
        let inv = invocation(&["-c", "esme", "--restore", "/etc/hosts,/root/.bashrc", "--restore-to", "/tmp/r"]);

        assert_eq!(inv.command, Command::Restore);
        assert_eq!(
            inv.restore.paths,
            Some(vec!["/etc/hosts".to_string(), "/root/.bashrc".to_string()])
        );
        assert_eq!(inv.restore.to.as_deref(), Some("/tmp/r"));
    }

    #[test]
    fn test_restore_after_search_restores_hits() {
        let inv = invocation(&["-c", "esme", "--search", ".bashrc$", "--restore"]);

        assert_eq!(inv.command, Command::Search(vec![".bashrc$".to_string()]));
        assert_eq!(inv.restore.paths, Some(Vec::new()));
    }

    #[test]
    fn test_restore_from_file_is_a_restore() {
        let inv = invocation(&["-c", "esme", "--restore-from", "/tmp/list.txt"]);

        assert_eq!(inv.command, Command::Restore);
        assert_eq!(inv.restore.from_file, Some(PathBuf::from("/tmp/list.txt")));
    }

    #[test]
    fn test_option_values_may_look_like_flags() {
        let inv = invocation(&["--global", "--opts", "--acls --xattrs", "--ninc", "-1"]);

        assert!(inv.settings.global);
        assert_eq!(inv.settings.opts, vec!["--acls --xattrs"]);
        assert_eq!(inv.settings.ninc, Some(-1));
    }

    #[test]
    fn test_compress_switches() {
        assert_eq!(invocation(&["--compress"]).settings.compress, Some(true));
        assert_eq!(invocation(&["--no-compress"]).settings.compress, Some(false));
    }

    #[test]
    fn test_profile_argument_is_normalised() {
        assert_eq!(invocation(&["--profile", "/etc/rubac/nightly.json"]).profile, "nightly");

        let cli = Cli::parse_args(["rubac", "--profile", "../"]).unwrap();
        assert!(matches!(cli.invocation(), Err(ProfileError::InvalidProfileName(_))));
    }

    #[test]
    fn test_own_help_and_version_flags() {
        assert_eq!(invocation(&["-h"]).command, Command::Help);
        assert_eq!(invocation(&["-V"]).command, Command::Version);
        assert_eq!(invocation(&["--examples"]).command, Command::Examples);
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::parse_args(["rubac", "--verbose", "--quiet"]).is_err());
    }
}
