/*
 * The per-generation manifest: the set of paths confirmed present in a generation,
 * persisted next to the payload so history and search never need to re-scan the
 * backup or re-run the sync tool. It is a path index only; file metadata is read
 * live from the generation when a caller needs it.
 *
 * Output lines of the sync tool are classified by a fixed, ordered rule table:
 *
 * | # | Rule            | Match                                              | Effect            |
 * |---|-----------------|----------------------------------------------------|-------------------|
 * | 1 | TransferSummary | `sent N bytes  received N bytes  R bytes/sec`      | none (reported)   |
 * | 2 | SizeSummary     | `total size is N  speedup is R`                    | none (reported)   |
 * | 3 | Unchanged       | line ends with ` is uptodate`                      | add `/<path>`     |
 * | 4 | Deleted         | line starts with `deleting `                       | remove `/<path>`  |
 * | 5 | Synced          | line starts with an include path minus its leading `/` | add `/<line>` |
 * | 6 | Other           | anything else                                      | none (logged)     |
 *
 * The first matching rule wins.
 */
use regex::Regex;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const MANIFEST_FILE_NAME: &str = "rubac.manifest.json";

#[derive(Debug)]
pub enum ManifestError {
    Io(io::Error),
    Serde(serde_json::Error),
}

impl From<io::Error> for ManifestError {
    fn from(err: io::Error) -> Self {
        ManifestError::Io(err)
    }
}

impl From<serde_json::Error> for ManifestError {
    fn from(err: serde_json::Error) -> Self {
        ManifestError::Serde(err)
    }
}

impl std::fmt::Display for ManifestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestError::Io(e) => write!(f, "Manifest I/O error: {e}"),
            ManifestError::Serde(e) => write!(f, "Malformed manifest: {e}"),
        }
    }
}

impl std::error::Error for ManifestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ManifestError::Io(e) => Some(e),
            ManifestError::Serde(e) => Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ManifestError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    TransferSummary {
        sent: u64,
        received: u64,
        rate: String,
    },
    SizeSummary {
        total: u64,
        speedup: String,
    },
    Unchanged(String),
    Deleted(String),
    Synced(String),
    Other,
}

fn transfer_summary_re() -> &'static Regex {
    static TRANSFER_RE: OnceLock<Regex> = OnceLock::new();
    TRANSFER_RE.get_or_init(|| {
        Regex::new(r"sent\s+(\d+)\s+bytes\s+received\s+(\d+)\s+bytes\s+(\d+(?:\.\d+)?)\s+bytes/sec")
            .expect("valid regex")
    })
}

fn size_summary_re() -> &'static Regex {
    static SIZE_RE: OnceLock<Regex> = OnceLock::new();
    SIZE_RE.get_or_init(|| {
        Regex::new(r"total size is\s+(\d+)\s+speedup is\s+(\d+(?:\.\d+)?)").expect("valid regex")
    })
}

fn deleting_re() -> &'static Regex {
    static DELETING_RE: OnceLock<Regex> = OnceLock::new();
    DELETING_RE.get_or_init(|| Regex::new(r"^\s*deleting\s+").expect("valid regex"))
}

const UPTODATE_SUFFIX: &str = " is uptodate";

fn with_leading_slash(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

/// Classifies sync tool output against the include paths of the current run.
/// Include paths are stored as prefixes without their leading separator, which is
/// how the tool echoes transferred paths when run with relative path names.
pub struct OutputClassifier {
    include_prefixes: Vec<String>,
}

impl OutputClassifier {
    pub fn new(includes: &[String]) -> Self {
        let include_prefixes = includes
            .iter()
            .map(|inc| inc.trim().trim_start_matches('/').to_string())
            .collect();
        OutputClassifier { include_prefixes }
    }

    pub fn classify(&self, line: &str) -> OutputLine {
        if let Some(caps) = transfer_summary_re().captures(line) {
            return OutputLine::TransferSummary {
                sent: caps[1].parse().unwrap_or(0),
                received: caps[2].parse().unwrap_or(0),
                rate: caps[3].to_string(),
            };
        }
        if let Some(caps) = size_summary_re().captures(line) {
            return OutputLine::SizeSummary {
                total: caps[1].parse().unwrap_or(0),
                speedup: caps[2].to_string(),
            };
        }
        if let Some(path) = line.strip_suffix(UPTODATE_SUFFIX) {
            return OutputLine::Unchanged(with_leading_slash(path));
        }
        if let Some(found) = deleting_re().find(line) {
            return OutputLine::Deleted(with_leading_slash(&line[found.end()..]));
        }
        if !line.is_empty()
            && self
                .include_prefixes
                .iter()
                .any(|prefix| line.starts_with(prefix.as_str()))
        {
            return OutputLine::Synced(with_leading_slash(line));
        }
        OutputLine::Other
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    paths: BTreeSet<String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_paths<I: IntoIterator<Item = String>>(paths: I) -> Self {
        Manifest {
            paths: paths.into_iter().collect(),
        }
    }

    pub fn paths(&self) -> &BTreeSet<String> {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Applies one classified line; returns true when the set changed.
    pub fn apply(&mut self, outcome: &OutputLine) -> bool {
        match outcome {
            OutputLine::Unchanged(path) | OutputLine::Synced(path) => {
                self.paths.insert(path.clone())
            }
            OutputLine::Deleted(path) => self.paths.remove(path),
            _ => false,
        }
    }

    pub fn apply_line(&mut self, classifier: &OutputClassifier, line: &str) -> OutputLine {
        let outcome = classifier.classify(line);
        self.apply(&outcome);
        outcome
    }
}

pub fn manifest_path(generation_dir: &Path) -> PathBuf {
    generation_dir.join(MANIFEST_FILE_NAME)
}

pub trait ManifestStoreOperations: Send + Sync {
    // An absent manifest loads as an empty set.
    fn load(&self, generation_dir: &Path) -> Result<Manifest>;
    fn save(&self, generation_dir: &Path, manifest: &Manifest) -> Result<()>;
}

pub struct CoreManifestStore {}

impl CoreManifestStore {
    pub fn new() -> Self {
        CoreManifestStore {}
    }
}

impl Default for CoreManifestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestStoreOperations for CoreManifestStore {
    fn load(&self, generation_dir: &Path) -> Result<Manifest> {
        let path = manifest_path(generation_dir);
        if !path.exists() {
            log::debug!("ManifestStore: No manifest at {path:?}, starting empty.");
            return Ok(Manifest::new());
        }
        let reader = BufReader::new(File::open(&path)?);
        let paths: Vec<String> = serde_json::from_reader(reader)?;
        log::debug!("ManifestStore: Loaded {} path(s) from {path:?}.", paths.len());
        Ok(Manifest::from_paths(paths))
    }

    fn save(&self, generation_dir: &Path, manifest: &Manifest) -> Result<()> {
        let path = manifest_path(generation_dir);
        if !generation_dir.exists() {
            fs::create_dir_all(generation_dir)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, &manifest.paths)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        log::debug!("ManifestStore: Saved {} path(s) to {path:?}.", manifest.len());
        Ok(())
    }
}
