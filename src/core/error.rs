/*
 * The error type shared by the run, history, search, prune and restore paths.
 * Module-level errors convert into it with `?`. Only construction bugs and an
 * unusable sync tool are fatal; everything else fails the affected client and lets
 * a batch continue with the next one.
 */
use super::config_store::ConfigError;
use super::destination::DestinationError;
use super::manifest::ManifestError;
use super::profiles::ProfileError;
use super::run_lock::RunLockError;
use super::selector::SelectorNotFound;
use super::sync_tool::SyncToolError;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum BackupError {
    Config(ConfigError),
    LockBusy(PathBuf),
    Precondition(String),
    SyncFailed { client: String, code: i32 },
    NotFound(String),
    Interrupted(String),
    Tool(SyncToolError),
    Manifest(ManifestError),
    Io { context: String, source: io::Error },
}

impl BackupError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        BackupError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            BackupError::Config(e) => e.is_fatal(),
            BackupError::Tool(e) => matches!(
                e,
                SyncToolError::UnsupportedVersion(_) | SyncToolError::UnrecognizedVersion(_)
            ),
            _ => false,
        }
    }
}

impl From<ConfigError> for BackupError {
    fn from(err: ConfigError) -> Self {
        BackupError::Config(err)
    }
}

impl From<ProfileError> for BackupError {
    fn from(err: ProfileError) -> Self {
        BackupError::Config(ConfigError::Profile(err))
    }
}

impl From<RunLockError> for BackupError {
    fn from(err: RunLockError) -> Self {
        match err {
            RunLockError::Busy(path) => BackupError::LockBusy(path),
            RunLockError::Io(path, e) => {
                BackupError::io(format!("lock file {}", path.display()), e)
            }
        }
    }
}

impl From<SyncToolError> for BackupError {
    fn from(err: SyncToolError) -> Self {
        BackupError::Tool(err)
    }
}

impl From<ManifestError> for BackupError {
    fn from(err: ManifestError) -> Self {
        BackupError::Manifest(err)
    }
}

impl From<DestinationError> for BackupError {
    fn from(err: DestinationError) -> Self {
        match err {
            DestinationError::Io(path, e) => BackupError::io(path.display().to_string(), e),
            other => BackupError::Precondition(other.to_string()),
        }
    }
}

impl From<SelectorNotFound> for BackupError {
    fn from(err: SelectorNotFound) -> Self {
        BackupError::NotFound(err.to_string())
    }
}

impl std::fmt::Display for BackupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupError::Config(e) => write!(f, "configuration error: {e}"),
            BackupError::LockBusy(path) => write!(
                f,
                "cannot lock file {}: another run is active for this client",
                path.display()
            ),
            BackupError::Precondition(msg) => write!(f, "{msg}"),
            BackupError::SyncFailed { client, code } => {
                write!(f, "sync for client '{client}' failed with exit status {code}")
            }
            BackupError::NotFound(msg) => write!(f, "{msg}"),
            BackupError::Interrupted(client) => {
                write!(f, "run for client '{client}' aborted on signal")
            }
            BackupError::Tool(e) => write!(f, "{e}"),
            BackupError::Manifest(e) => write!(f, "{e}"),
            BackupError::Io { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackupError::Config(e) => Some(e),
            BackupError::Tool(e) => Some(e),
            BackupError::Manifest(e) => Some(e),
            BackupError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_construction_bugs_and_bad_tools_are_fatal() {
        assert!(BackupError::from(ConfigError::UnknownOperation("x".into())).is_fatal());
        assert!(BackupError::Tool(SyncToolError::UnsupportedVersion("2.5.5".into())).is_fatal());
        assert!(!BackupError::LockBusy(PathBuf::from("/b/rubac.runlock")).is_fatal());
        assert!(
            !BackupError::SyncFailed {
                client: "esme".into(),
                code: 23
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_lock_busy_conversion_keeps_path() {
        let err = BackupError::from(RunLockError::Busy(PathBuf::from("/b/esme/rubac.runlock")));
        assert!(matches!(err, BackupError::LockBusy(ref p) if p.ends_with("rubac.runlock")));
        assert!(err.to_string().contains("/b/esme/rubac.runlock"));
    }
}
