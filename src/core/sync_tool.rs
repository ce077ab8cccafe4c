/*
 * Invocation of the external synchronization tool (rsync). Argument lists are built
 * by pure functions so they can be checked without running anything; the process
 * itself sits behind `SyncToolOperations` so runs can be driven by a scripted double.
 *
 * The tool's stdout and stderr are merged into one line stream: one reader thread
 * per pipe forwards lines over a channel, and the exit status is collected only
 * after both pipes have closed.
 */
use regex::Regex;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{OnceLock, mpsc};
use std::thread;

pub const DEFAULT_SYNC_PROGRAM: &str = "rsync";
pub const SYNC_PROGRAM_ENV: &str = "RUBAC_RSYNC";
// First release with --link-dest.
pub const MIN_TOOL_VERSION: (u32, u32, u32) = (2, 5, 6);

const GLOBAL_FLAGS: [&str; 7] = [
    "-a",
    "-v",
    "-v",
    "--relative",
    "--delete-excluded",
    "--ignore-errors",
    "--one-file-system",
];
const RESTORE_FLAGS: [&str; 6] = ["-a", "-r", "-v", "-v", "--relative", "--one-file-system"];

#[derive(Debug)]
pub enum SyncToolError {
    Spawn(String, io::Error),
    Io(io::Error),
    UnrecognizedVersion(String),
    UnsupportedVersion(String),
}

impl From<io::Error> for SyncToolError {
    fn from(err: io::Error) -> Self {
        SyncToolError::Io(err)
    }
}

impl std::fmt::Display for SyncToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncToolError::Spawn(program, e) => write!(f, "failed to start {program}: {e}"),
            SyncToolError::Io(e) => write!(f, "sync tool I/O error: {e}"),
            SyncToolError::UnrecognizedVersion(out) => {
                write!(f, "cannot determine sync tool version from '{out}'")
            }
            SyncToolError::UnsupportedVersion(v) => {
                let (a, b, c) = MIN_TOOL_VERSION;
                write!(f, "sync tool version {v} is older than required {a}.{b}.{c}")
            }
        }
    }
}

impl std::error::Error for SyncToolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncToolError::Spawn(_, e) | SyncToolError::Io(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncToolError>;

pub trait SyncToolOperations: Send + Sync {
    /*
     * Runs the tool with `args`, calling `on_line` for every line of merged
     * output, and returns the exit code. A process killed by a signal reports -1.
     */
    fn run(&self, args: &[String], on_line: &mut dyn FnMut(&str)) -> Result<i32>;

    // First line of `--version` output.
    fn version_banner(&self) -> Result<String>;
}

/// Inputs for a backup-mode invocation. `delete` is off for in-place updates;
/// `link_dest` and `exclude_from` are only passed when present.
#[derive(Debug, Clone, Default)]
pub struct BackupArgs {
    pub opts: Vec<String>,
    pub compress: bool,
    pub dry_run: bool,
    pub delete: bool,
    pub link_dest: Option<PathBuf>,
    pub exclude_from: Option<PathBuf>,
    pub sources: Vec<String>,
    pub target: PathBuf,
}

pub fn backup_args(spec: &BackupArgs) -> Vec<String> {
    let mut args: Vec<String> = GLOBAL_FLAGS.iter().map(|s| s.to_string()).collect();
    args.push("-r".to_string());
    args.extend(spec.opts.iter().cloned());
    if spec.compress {
        args.push("--compress".to_string());
    }
    if spec.dry_run {
        args.push("--dry-run".to_string());
    }
    if spec.delete {
        args.push("--delete".to_string());
    }
    if let Some(link_dest) = &spec.link_dest {
        args.push(format!("--link-dest={}", link_dest.display()));
    }
    if let Some(exclude_from) = &spec.exclude_from {
        args.push(format!("--exclude-from={}", exclude_from.display()));
    }
    args.extend(spec.sources.iter().cloned());
    args.push(spec.target.display().to_string());
    args
}

pub fn restore_args(dry_run: bool, files_from: &Path, source_root: &Path, destination: &str) -> Vec<String> {
    let mut args: Vec<String> = RESTORE_FLAGS.iter().map(|s| s.to_string()).collect();
    if dry_run {
        args.push("--dry-run".to_string());
    }
    args.push(format!("--files-from={}", files_from.display()));
    args.push(source_root.display().to_string());
    args.push(destination.to_string());
    args
}

pub fn is_local_address(address: &str) -> bool {
    matches!(address, "localhost" | "127.0.0.1")
}

// Remote clients are pulled as `address:path`.
pub fn source_paths(includes: &[String], address: &str) -> Vec<String> {
    includes
        .iter()
        .map(|inc| {
            if is_local_address(address) {
                inc.clone()
            } else {
                format!("{address}:{inc}")
            }
        })
        .collect()
}

fn version_re() -> &'static Regex {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    VERSION_RE.get_or_init(|| {
        Regex::new(r"version\s+(\d+)\.(\d+)\.(\d+)").expect("valid regex")
    })
}

pub fn parse_version(banner: &str) -> Option<(u32, u32, u32)> {
    let caps = version_re().captures(banner)?;
    Some((
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}

pub fn check_version(tool: &dyn SyncToolOperations) -> Result<(u32, u32, u32)> {
    let banner = tool.version_banner()?;
    let version = parse_version(&banner)
        .ok_or_else(|| SyncToolError::UnrecognizedVersion(banner.trim().to_string()))?;
    if version < MIN_TOOL_VERSION {
        let (a, b, c) = version;
        return Err(SyncToolError::UnsupportedVersion(format!("{a}.{b}.{c}")));
    }
    log::debug!("SyncTool: version {version:?} accepted");
    Ok(version)
}

pub struct CoreSyncTool {
    program: OsString,
}

impl CoreSyncTool {
    pub fn new(program: impl Into<OsString>) -> Self {
        CoreSyncTool {
            program: program.into(),
        }
    }

    pub fn from_env() -> Self {
        let program = std::env::var_os(SYNC_PROGRAM_ENV)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| OsString::from(DEFAULT_SYNC_PROGRAM));
        Self::new(program)
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

impl Default for CoreSyncTool {
    fn default() -> Self {
        Self::from_env()
    }
}

// Forwards each line of `pipe` to `tx`; invalid UTF-8 in file names is replaced.
fn forward_lines<R: Read + Send + 'static>(
    pipe: R,
    tx: mpsc::Sender<String>,
) -> thread::JoinHandle<io::Result<()>> {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            if tx.send(line).is_err() {
                return Ok(());
            }
        }
    })
}

impl SyncToolOperations for CoreSyncTool {
    fn run(&self, args: &[String], on_line: &mut dyn FnMut(&str)) -> Result<i32> {
        log::info!("SyncTool: {} {}", self.program_name(), args.join(" "));
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SyncToolError::Spawn(self.program_name(), e))?;

        let (tx, rx) = mpsc::channel::<String>();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        for line in rx {
            on_line(&line);
        }
        for reader in readers {
            match reader.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("SyncTool: Output reader failed: {e}"),
                Err(_) => log::warn!("SyncTool: Output reader thread panicked."),
            }
        }

        let status = child.wait()?;
        let code = status.code().unwrap_or(-1);
        log::debug!("SyncTool: exited with {status}");
        Ok(code)
    }

    fn version_banner(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| SyncToolError::Spawn(self.program_name(), e))?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().next().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BannerOnly(&'static str);

    impl SyncToolOperations for BannerOnly {
        fn run(&self, _args: &[String], _on_line: &mut dyn FnMut(&str)) -> Result<i32> {
            Ok(0)
        }
        fn version_banner(&self) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_backup_args_full_run() {
        let spec = BackupArgs {
            opts: vec!["--acls".to_string()],
            compress: true,
            dry_run: false,
            delete: true,
            link_dest: Some(PathBuf::from("/b/rubac/esme/rubac.2024-01-01")),
            exclude_from: Some(PathBuf::from("/tmp/rubac.2024-01-02.esme.excl")),
            sources: source_paths(&["/home/steeve".to_string()], "esme.lan"),
            target: PathBuf::from("/b/rubac/esme/rubac.2024-01-02"),
        };

        let args = backup_args(&spec);

        assert_eq!(
            args,
            vec![
                "-a",
                "-v",
                "-v",
                "--relative",
                "--delete-excluded",
                "--ignore-errors",
                "--one-file-system",
                "-r",
                "--acls",
                "--compress",
                "--delete",
                "--link-dest=/b/rubac/esme/rubac.2024-01-01",
                "--exclude-from=/tmp/rubac.2024-01-02.esme.excl",
                "esme.lan:/home/steeve",
                "/b/rubac/esme/rubac.2024-01-02",
            ]
        );
    }

    #[test]
    fn test_backup_args_update_omits_delete_and_link_dest() {
        let spec = BackupArgs {
            dry_run: true,
            sources: source_paths(&["/etc".to_string()], "localhost"),
            target: PathBuf::from("/b/t"),
            ..Default::default()
        };
        let args = backup_args(&spec);
        assert!(args.contains(&"--dry-run".to_string()));
        assert!(!args.contains(&"--delete".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--link-dest")));
        assert_eq!(&args[args.len() - 2..], &["/etc".to_string(), "/b/t".to_string()]);
    }

    #[test]
    fn test_restore_args() {
        let args = restore_args(false, Path::new("/tmp/list.dat"), Path::new("/b/g"), "esme:/tmp/r");
        assert_eq!(
            args,
            vec![
                "-a",
                "-r",
                "-v",
                "-v",
                "--relative",
                "--one-file-system",
                "--files-from=/tmp/list.dat",
                "/b/g",
                "esme:/tmp/r",
            ]
        );
    }

    #[test]
    fn test_version_gate() {
        assert_eq!(
            parse_version("rsync  version 3.2.7  protocol version 31"),
            Some((3, 2, 7))
        );
        assert!(check_version(&BannerOnly("rsync  version 3.2.7  protocol version 31")).is_ok());
        assert!(check_version(&BannerOnly("rsync version 2.5.6 protocol version 26")).is_ok());
        assert!(matches!(
            check_version(&BannerOnly("rsync version 2.5.5 protocol version 26")),
            Err(SyncToolError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            check_version(&BannerOnly("not a sync tool")),
            Err(SyncToolError::UnrecognizedVersion(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_core_sync_tool_merges_stdout_and_stderr() {
        let tool = CoreSyncTool::new("sh");
        let args = vec![
            "-c".to_string(),
            "echo out; echo err 1>&2; exit 3".to_string(),
        ];
        let mut lines = Vec::new();

        let code = tool.run(&args, &mut |line: &str| lines.push(line.to_string())).unwrap();

        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
        assert_eq!(code, 3);
    }
}
