/*
 * The per-client generation table and its rotation algorithm.
 *
 * A client's generations are addressed by slot: slot 0 is the most recent run and
 * higher slots are older, up to the retention depth `ninc`. The table only stores
 * directory names; rotating it never moves files, it shifts the pointers so each
 * generation ages by one slot. The generation that falls off the end is reported
 * back as the expire directory and deleted by the caller once the new run commits.
 *
 * Rotation works on an owned copy of the slot map. The run controller writes the
 * rotated table back into the config store only when the run commits, so a failed
 * or dry run leaves the persisted table exactly as it was.
 */
use super::clock::{self, ClockOperations};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_INFIX: &str = "snapshot";

pub fn generation_name(profile: &str, date_stamp: &str) -> String {
    format!("{profile}.{date_stamp}")
}

pub fn snapshot_name(profile: &str, label: &str) -> String {
    format!("{profile}.{SNAPSHOT_INFIX}.{label}")
}

/// A snapshot label becomes one path component inside the client directory.
pub fn is_valid_snapshot_label(label: &str) -> bool {
    !label.is_empty()
        && label != "."
        && !label.contains("..")
        && !label.contains(['/', '\\', '\0'])
}

pub fn snapshot_prefix(profile: &str) -> String {
    format!("{profile}.{SNAPSHOT_INFIX}.")
}

/*
 * Picks a directory name for a new generation that does not exist yet in the
 * client directory. The date alone is preferred; a second run on the same day gets
 * a time suffix, and a numeric suffix breaks any remaining tie.
 */
pub fn fresh_generation_name(profile: &str, clock: &dyn ClockOperations, client_dir: &Path) -> String {
    let now = clock.now();
    let base = generation_name(profile, &clock::format_with(now, clock::DATE_FORMAT));
    if !client_dir.join(&base).exists() {
        return base;
    }
    let timed = format!("{base}_{}", clock::format_with(now, clock::TIME_SUFFIX_FORMAT));
    if !client_dir.join(&timed).exists() {
        log::debug!("GenerationTable: '{base}' already exists, using '{timed}'.");
        return timed;
    }
    let mut counter = 1u32;
    loop {
        let candidate = format!("{timed}.{counter}");
        if !client_dir.join(&candidate).exists() {
            log::debug!("GenerationTable: '{timed}' already exists, using '{candidate}'.");
            return candidate;
        }
        counter += 1;
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Rotation {
    // Generation that aged past the retention depth; deleted on commit.
    pub expire: Option<PathBuf>,
    // Slots whose generation directory had disappeared, truncating the chain.
    pub truncated: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationTable {
    slots: BTreeMap<u32, String>,
    ninc: u32,
}

impl GenerationTable {
    pub fn new(slots: BTreeMap<u32, String>, ninc: u32) -> Self {
        GenerationTable { slots, ninc }
    }

    pub fn ninc(&self) -> u32 {
        self.ninc
    }

    pub fn get(&self, slot: u32) -> &str {
        self.slots.get(&slot).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, slot: u32, name: &str) {
        self.slots.insert(slot, name.to_string());
    }

    pub fn into_slots(self) -> BTreeMap<u32, String> {
        self.slots
    }

    /// Ages every generation by one slot, from the oldest end down to slot 0.
    ///
    /// For m = ninc..=1 with n = m - 1:
    ///   - an empty slot n has nothing to promote;
    ///   - a slot n whose directory vanished clears slots n and m (the chain is
    ///     truncated there and rebuilds from later runs);
    ///   - when m is the last slot and names an existing directory, that directory
    ///     is the expire directory;
    ///   - slot m then takes slot n's name.
    ///
    /// Slot 0 keeps its old name; the caller overwrites it with the new generation.
    pub fn rotate(&mut self, client_dir: &Path) -> Rotation {
        let mut rotation = Rotation::default();
        for m in (1..=self.ninc).rev() {
            let n = m - 1;
            let n_name = self.get(n).to_string();
            if n_name.is_empty() {
                continue;
            }
            let m_name = self.get(m).to_string();
            log::debug!("GenerationTable: n={n} '{n_name}' m={m} '{m_name}'");

            if !client_dir.join(&n_name).exists() {
                log::error!(
                    "GenerationTable: Generation '{n_name}' (slot {n}) not found in {client_dir:?}, truncating chain."
                );
                if !m_name.is_empty() && client_dir.join(&m_name).exists() {
                    log::warn!(
                        "GenerationTable: '{m_name}' (slot {m}) is no longer referenced and must be removed by hand."
                    );
                }
                self.set(n, "");
                self.set(m, "");
                rotation.truncated.push(n);
                continue;
            }

            if m == self.ninc && !m_name.is_empty() {
                let m_dir = client_dir.join(&m_name);
                if m_dir.exists() {
                    log::info!("GenerationTable: '{m_name}' expires from slot {m}.");
                    rotation.expire = Some(m_dir);
                }
            }
            self.set(m, &n_name);
        }
        rotation
    }

    /// Names in slots 0..=ninc up to (not including) the first empty slot.
    pub fn numbered_history(&self) -> Vec<String> {
        (0..=self.ninc)
            .map(|slot| self.get(slot))
            .take_while(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    /*
     * Removes the generation in `slot` from the numbered chain: every older
     * generation moves one slot younger and the last occupied slot is cleared.
     */
    pub fn remove_slot(&mut self, slot: u32) {
        let occupied = self.numbered_history().len() as u32;
        if occupied == 0 || slot >= occupied {
            self.set(slot, "");
            return;
        }
        let last = occupied - 1;
        for x in slot..last {
            let older = self.get(x + 1).to_string();
            log::info!("GenerationTable: slot {x} <- '{older}'");
            self.set(x, &older);
        }
        self.set(last, "");
    }

    /// Scans from the deepest slot towards slot 0 and returns the first occupied one.
    pub fn oldest(&self) -> Option<&str> {
        (0..=self.ninc)
            .rev()
            .map(|slot| self.get(slot))
            .find(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use std::fs;
    use tempfile::TempDir;
    use time::macros::datetime;

    fn table(names: &[&str], ninc: u32) -> GenerationTable {
        let slots = names
            .iter()
            .enumerate()
            .map(|(i, n)| (i as u32, n.to_string()))
            .collect();
        GenerationTable::new(slots, ninc)
    }

    fn make_dirs(root: &Path, names: &[&str]) {
        for name in names.iter().filter(|n| !n.is_empty()) {
            fs::create_dir_all(root.join(name)).unwrap();
        }
    }

    #[test]
    fn test_snapshot_labels_stay_one_component() {
        assert!(is_valid_snapshot_label("pre-upgrade"));
        assert!(is_valid_snapshot_label("2024.01.01"));
        for label in ["", ".", "..", "a/b", "/../../other", "x..y", "a\\b", "nul\0"] {
            assert!(!is_valid_snapshot_label(label), "{label:?} accepted");
        }
    }

    #[test]
    fn test_rotate_shifts_pointers_and_keeps_slot_zero() {
        // Arrange
        let temp_dir = TempDir::new().unwrap();
        make_dirs(temp_dir.path(), &["g2", "g1"]);
        let mut t = table(&["g2", "g1"], 3);

        // Act
        let rotation = t.rotate(temp_dir.path());

        // Assert
        assert_eq!(rotation, Rotation::default());
        assert_eq!(t.get(0), "g2");
        assert_eq!(t.get(1), "g2");
        assert_eq!(t.get(2), "g1");
        assert_eq!(t.get(3), "");
    }

    #[test]
    fn test_rotate_full_chain_reports_expire_dir() {
        let temp_dir = TempDir::new().unwrap();
        make_dirs(temp_dir.path(), &["g3", "g2", "g1"]);
        let mut t = table(&["g3", "g2", "g1"], 2);

        let rotation = t.rotate(temp_dir.path());

        assert_eq!(rotation.expire, Some(temp_dir.path().join("g1")));
        assert_eq!(t.numbered_history(), vec!["g3", "g3", "g2"]);
    }

    #[test]
    fn test_rotate_truncates_at_missing_directory() {
        // slot 2 ("g2") was deleted by hand
        let temp_dir = TempDir::new().unwrap();
        make_dirs(temp_dir.path(), &["g4", "g3", "g1"]);
        let mut t = table(&["g4", "g3", "g2", "g1"], 3);

        let rotation = t.rotate(temp_dir.path());

        assert_eq!(rotation.truncated, vec![2]);
        assert_eq!(rotation.expire, None, "orphaned oldest generation is not expired");
        assert_eq!(t.get(3), "");
        assert_eq!(t.get(2), "g3");
        assert_eq!(t.get(1), "g4");
    }

    #[test]
    fn test_rotate_with_zero_depth_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();
        make_dirs(temp_dir.path(), &["g1"]);
        let mut t = table(&["g1"], 0);
        assert_eq!(t.rotate(temp_dir.path()), Rotation::default());
        assert_eq!(t.numbered_history(), vec!["g1"]);
    }

    #[test]
    fn test_numbered_history_stops_at_first_gap() {
        let t = table(&["g3", "", "g1"], 5);
        assert_eq!(t.numbered_history(), vec!["g3"]);
    }

    #[test]
    fn test_remove_slot_shifts_older_generations_down() {
        let mut t = table(&["g4", "g3", "g2", "g1"], 5);
        t.remove_slot(1);
        assert_eq!(t.numbered_history(), vec!["g4", "g2", "g1"]);
        assert_eq!(t.get(3), "");

        t.remove_slot(2);
        assert_eq!(t.numbered_history(), vec!["g4", "g2"]);
    }

    #[test]
    fn test_oldest_scans_from_deepest_slot() {
        let t = table(&["g3", "", "g1"], 5);
        assert_eq!(t.oldest(), Some("g1"));
        assert_eq!(table(&[], 5).oldest(), None);
    }

    #[test]
    fn test_fresh_generation_name_avoids_existing_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let clock = FixedClock::at(datetime!(2024-01-01 10:20:30 UTC));

        assert_eq!(
            fresh_generation_name("rubac", &clock, temp_dir.path()),
            "rubac.2024-01-01"
        );
        make_dirs(temp_dir.path(), &["rubac.2024-01-01"]);
        assert_eq!(
            fresh_generation_name("rubac", &clock, temp_dir.path()),
            "rubac.2024-01-01_102030"
        );
        make_dirs(temp_dir.path(), &["rubac.2024-01-01_102030"]);
        assert_eq!(
            fresh_generation_name("rubac", &clock, temp_dir.path()),
            "rubac.2024-01-01_102030.1"
        );
    }

    #[test]
    fn test_snapshot_names() {
        assert_eq!(snapshot_name("rubac", "pre-upgrade"), "rubac.snapshot.pre-upgrade");
        assert!(snapshot_name("rubac", "x").starts_with(&snapshot_prefix("rubac")));
    }
}
