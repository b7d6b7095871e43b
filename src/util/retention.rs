//! Thinning out of old local dumps.

use std::collections::HashSet;
use std::fs;
use std::hash::Hash;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};

use crate::mongodb::DumpMode;

/// Configure retention of dumps.
///
/// If either value is [None] every dump of the type will be kept.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Defines how many daily dumps to keep.
    pub daily: Option<usize>,

    /// Defines how many weekly dumps to keep.
    ///
    /// A weekly dump is the newest dump of an ISO week.
    pub weekly: Option<usize>,

    /// Defines how many monthly dumps to keep.
    pub monthly: Option<usize>,

    /// Defines how many quarterly dumps to keep.
    pub quarterly: Option<usize>,

    /// Defines how many yearly dumps to keep.
    pub yearly: Option<usize>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily: Some(10),
            weekly: Some(0),
            monthly: Some(10),
            quarterly: Some(0),
            yearly: Some(10),
        }
    }
}

#[derive(Clone, Debug)]
struct Slots<K> {
    keep: Option<usize>,
    taken: HashSet<K>,
}

impl<K: Eq + Hash> Slots<K> {
    fn new(keep: Option<usize>) -> Self {
        Self {
            keep,
            taken: HashSet::new(),
        }
    }

    /// Takes the slot of `key` if it is still free and slots are left.
    fn claim(&mut self, key: K) -> bool {
        let room = self.keep.is_none_or(|keep| self.taken.len() < keep);
        room && self.taken.insert(key)
    }
}

/// Decides which dates to keep. Dates have to be offered newest first.
#[derive(Clone, Debug)]
pub struct Retention {
    daily: Slots<(i32, u32)>,
    weekly: Slots<(i32, u32)>,
    monthly: Slots<(i32, u32)>,
    quarterly: Slots<(i32, u32)>,
    yearly: Slots<i32>,
}

impl From<RetentionConfig> for Retention {
    fn from(config: RetentionConfig) -> Self {
        Self::new(config)
    }
}

impl Retention {
    pub fn new(config: RetentionConfig) -> Self {
        Self {
            daily: Slots::new(config.daily),
            weekly: Slots::new(config.weekly),
            monthly: Slots::new(config.monthly),
            quarterly: Slots::new(config.quarterly),
            yearly: Slots::new(config.yearly),
        }
    }

    /// Returns if the [Datelike] is to be retained.
    pub fn retain(&mut self, date: impl Datelike) -> bool {
        let week = date.iso_week();
        // every category has to see the date, so no short-circuiting
        let claims = [
            self.daily.claim((date.year(), date.ordinal())),
            self.weekly.claim((week.year(), week.week())),
            self.monthly.claim((date.year(), date.month())),
            self.quarterly.claim((date.year(), date.quarter())),
            self.yearly.claim(date.year()),
        ];

        claims.contains(&true)
    }
}

/// Parses artifact names like `6-3-2024`.
pub fn parse_artifact_name(name: &str) -> Option<NaiveDate> {
    let mut parts = name.splitn(3, '-');
    let day = parts.next()?.parse().ok()?;
    let month = parts.next()?.parse().ok()?;
    let year = parts.next()?.parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)
}

/// Dated dumps of `mode` found in `backup_root`.
fn dated_dumps(backup_root: &Path, mode: DumpMode) -> io::Result<Vec<(NaiveDate, PathBuf)>> {
    let mut dumps = Vec::new();
    for entry in fs::read_dir(backup_root)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };

        let is_dir = entry.file_type()?.is_dir();
        let name = match mode {
            DumpMode::Archive if !is_dir => file_name.strip_suffix(".gz"),
            DumpMode::Directory if is_dir => Some(file_name),
            _ => None,
        };

        if let Some(date) = name.and_then(parse_artifact_name) {
            dumps.push((date, entry.path()));
        }
    }

    Ok(dumps)
}

/// Removes the dumps in `backup_root` not retained by `config`.
///
/// `current` is never removed, whatever its date, but still claims its slots.
/// Returns the removed (or on a dry run: the to be removed) dumps.
pub fn prune(
    backup_root: &Path,
    mode: DumpMode,
    config: RetentionConfig,
    current: &Path,
    dry_run: bool,
) -> io::Result<Vec<PathBuf>> {
    let mut dumps = dated_dumps(backup_root, mode)?;
    dumps.sort_by(|a, b| b.0.cmp(&a.0));

    let mut retention = Retention::new(config);
    let mut removed = Vec::new();
    for (date, path) in dumps {
        if retention.retain(date) | (path.as_path() == current) {
            log::trace!(target: "retention", "Keeping {}", path.display());
            continue;
        }

        if dry_run {
            log::info!(target: "retention", "Would remove {}", path.display());
        } else {
            log::info!(target: "retention", "Removing {}", path.display());
            match mode {
                DumpMode::Archive => fs::remove_file(&path)?,
                DumpMode::Directory => fs::remove_dir_all(&path)?,
            }
        }
        removed.push(path);
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keep_only(daily: usize) -> RetentionConfig {
        RetentionConfig {
            daily: Some(daily),
            weekly: Some(0),
            monthly: Some(0),
            quarterly: Some(0),
            yearly: Some(0),
        }
    }

    #[test]
    fn parses_names() {
        assert_eq!(
            parse_artifact_name("6-3-2024"),
            NaiveDate::from_ymd_opt(2024, 3, 6)
        );
        assert_eq!(
            parse_artifact_name("24-12-2023"),
            NaiveDate::from_ymd_opt(2023, 12, 24)
        );
        assert_eq!(parse_artifact_name("31-2-2024"), None);
        assert_eq!(parse_artifact_name("latest"), None);
    }

    #[test]
    fn keeps_daily_then_monthly() {
        let config = RetentionConfig {
            daily: Some(2),
            weekly: Some(0),
            monthly: Some(2),
            quarterly: Some(0),
            yearly: Some(0),
        };
        let mut retention = Retention::new(config);
        let d = |m, d| NaiveDate::from_ymd_opt(2024, m, d).unwrap();

        assert!(retention.retain(d(3, 6))); // daily, monthly march
        assert!(retention.retain(d(3, 5))); // daily
        assert!(!retention.retain(d(3, 4)));
        assert!(retention.retain(d(2, 28))); // monthly february
        assert!(!retention.retain(d(2, 1)));
        assert!(!retention.retain(d(1, 31)));
    }

    #[test]
    fn unlimited_keeps_everything() {
        let config = RetentionConfig {
            daily: None,
            ..keep_only(0)
        };
        let mut retention = Retention::new(config);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(start.iter_days().take(100).all(|d| retention.retain(d)));
    }

    #[test]
    fn prunes_old_archives() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["6-3-2024.gz", "5-3-2024.gz", "4-3-2024.gz", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("1-1-2024")).unwrap();

        let current = dir.path().join("6-3-2024.gz");
        let removed = prune(dir.path(), DumpMode::Archive, keep_only(2), &current, false).unwrap();
        assert_eq!(removed, vec![dir.path().join("4-3-2024.gz")]);
        assert!(!dir.path().join("4-3-2024.gz").exists());
        assert!(dir.path().join("5-3-2024.gz").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("1-1-2024").exists());
    }

    #[test]
    fn prune_dry_run_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["6-3-2024", "5-3-2024"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }

        let current = dir.path().join("6-3-2024");
        let removed = prune(dir.path(), DumpMode::Directory, keep_only(1), &current, true).unwrap();
        assert_eq!(removed, vec![dir.path().join("5-3-2024")]);
        assert!(dir.path().join("5-3-2024").exists());
    }

    #[test]
    fn current_dump_survives_newer_entries() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["7-3-2024", "6-3-2024", "5-3-2024"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }

        let current = dir.path().join("6-3-2024");
        let removed = prune(dir.path(), DumpMode::Directory, keep_only(1), &current, false).unwrap();
        assert_eq!(removed, vec![dir.path().join("5-3-2024")]);
        assert!(dir.path().join("7-3-2024").is_dir());
        assert!(current.is_dir());
    }

    #[test]
    fn current_dump_survives_keeping_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("6-3-2024.gz"), b"").unwrap();

        let current = dir.path().join("6-3-2024.gz");
        let removed = prune(dir.path(), DumpMode::Archive, keep_only(0), &current, false).unwrap();
        assert!(removed.is_empty());
        assert!(current.is_file());
    }
}
