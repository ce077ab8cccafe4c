/*
 * Searching backup generations through their manifests.
 *
 * Each pattern is matched case-insensitively against every manifest entry of every
 * searched generation. Hits are confirmed on disk, and a file that several
 * generations share through hardlinks is reported only for the first generation
 * it is seen in.
 */
use super::checksum_utils;
use super::clock::{self, TIMESTAMP_FORMAT};
use super::error::{BackupError, Result};
use super::manifest::ManifestStoreOperations;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitDetails {
    pub kind: &'static str,
    pub size: u64,
    pub modified: String,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub inode: u64,
    pub sha256: Option<String>,
}

impl HitDetails {
    fn read(path: &Path, meta: &fs::Metadata) -> Self {
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            "symlink"
        } else if file_type.is_dir() {
            "directory"
        } else if file_type.is_file() {
            "file"
        } else {
            "special"
        };
        let modified = meta
            .modified()
            .map(|t| clock::format_with(OffsetDateTime::from(t), TIMESTAMP_FORMAT))
            .unwrap_or_default();
        let sha256 = if file_type.is_file() {
            match checksum_utils::file_sha256(path) {
                Ok(digest) => Some(digest),
                Err(e) => {
                    log::warn!("Search: cannot checksum {path:?}: {e}");
                    None
                }
            }
        } else {
            None
        };
        HitDetails {
            kind,
            size: meta.len(),
            modified,
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.permissions().mode() & 0o7777,
            inode: meta.ino(),
            sha256,
        }
    }
}

impl std::fmt::Display for HitDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} size={} mtime={} owner={}:{} mode={:04o} inode={}",
            self.kind, self.size, self.modified, self.uid, self.gid, self.mode, self.inode
        )?;
        if let Some(digest) = &self.sha256 {
            write!(f, " sha256={digest}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    // Manifest entry, absolute as on the client.
    pub path: String,
    pub details: Option<HitDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationHits {
    pub pattern: String,
    pub generation: String,
    pub basedir: PathBuf,
    pub hits: Vec<SearchHit>,
}

pub struct SearchRequest<'a> {
    pub patterns: &'a [String],
    pub generations: &'a [String],
    pub verbose: bool,
}

pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| BackupError::Precondition(format!("invalid search pattern '{pattern}': {e}")))
}

/// Runs every pattern over every generation under `client_dir`, in the order
/// given. Generations whose manifest cannot be read are skipped with an error
/// in the log; the search carries on with the rest.
pub fn search(
    manifests: &dyn ManifestStoreOperations,
    client_dir: &Path,
    request: &SearchRequest,
) -> Result<Vec<GenerationHits>> {
    let mut results = Vec::new();
    let mut seen_inodes: HashSet<(u64, u64)> = HashSet::new();

    for pattern in request.patterns {
        let re = compile_pattern(pattern)?;
        for generation in request.generations {
            let basedir = client_dir.join(generation);
            log::debug!("Search: searching {generation} for '{pattern}'");
            if !basedir.is_dir() {
                log::error!("Search: backup {basedir:?} not found");
                continue;
            }
            let manifest = match manifests.load(&basedir) {
                Ok(manifest) => manifest,
                Err(e) => {
                    log::error!("Search: cannot read manifest of {generation}: {e}");
                    continue;
                }
            };

            let mut hits = Vec::new();
            for entry in manifest.paths().iter().filter(|p| re.is_match(p)) {
                let full_path = basedir.join(entry.trim_start_matches('/'));
                let meta = match fs::symlink_metadata(&full_path) {
                    Ok(meta) => meta,
                    Err(_) => {
                        log::error!("Search: file not found {full_path:?}");
                        continue;
                    }
                };
                if !seen_inodes.insert((meta.dev(), meta.ino())) {
                    log::trace!("Search: {entry} in {generation} already reported");
                    continue;
                }
                let details = request
                    .verbose
                    .then(|| HitDetails::read(&full_path, &meta));
                hits.push(SearchHit {
                    path: entry.clone(),
                    details,
                });
            }
            if !hits.is_empty() {
                results.push(GenerationHits {
                    pattern: pattern.clone(),
                    generation: generation.clone(),
                    basedir,
                    hits,
                });
            }
        }
    }
    Ok(results)
}

/// Every hit path once, in first-seen order; feeds a restore list.
pub fn restore_list(results: &[GenerationHits]) -> Vec<String> {
    let mut seen = HashSet::new();
    results
        .iter()
        .flat_map(|g| g.hits.iter())
        .filter(|hit| seen.insert(hit.path.clone()))
        .map(|hit| hit.path.clone())
        .collect()
}
