//! Incremental re-synchronization across repeated builds.
//!
//! A [`SyncSession`] is the explicit, caller-owned object that replaces
//! any notion of a global "current symbol file". It retains the snapshot
//! of the last successful sync so a delta can prove it is diffing against
//! the right base.

use crate::container::ImageConfig;
use crate::error::{Error, Result};
use crate::image::ElfImage;
use crate::set::{SnapshotToken, SymbolKey, SymbolSet, SymbolSnapshot};
use crate::symbol::{SectionRef, SymbolRecord};
use log::debug;
use std::collections::{HashMap, HashSet};

/// Whether a sync call re-encodes everything or only the changed subset.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Encode the entire current set every call.
    #[default]
    Full,
    /// Encode the changed subset plus carry-over references.
    Delta,
}

/// The keyed add/remove/modify difference between two snapshots.
#[derive(Debug, Clone, Default)]
pub struct SymbolDiff {
    pub added: Vec<SymbolRecord>,
    pub removed: Vec<SymbolKey>,
    pub modified: Vec<SymbolRecord>,
}

impl SymbolDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Compute the difference from `base` to `current`, keyed by
    /// (name, section). A record counts as modified when its key survives
    /// but any other field changed.
    pub fn between(base: &SymbolSnapshot, current: &SymbolSnapshot) -> SymbolDiff {
        let base_map: HashMap<SymbolKey, &SymbolRecord> = base
            .iter()
            .map(|record| (SymbolKey::of(record), record))
            .collect();
        let current_keys: HashSet<SymbolKey> = current.iter().map(SymbolKey::of).collect();

        let mut diff = SymbolDiff::default();
        for record in current.iter() {
            match base_map.get(&SymbolKey::of(record)) {
                None => diff.added.push(record.clone()),
                Some(&old) if old != record => diff.modified.push(record.clone()),
                Some(_) => {}
            }
        }
        for record in base.iter() {
            let key = SymbolKey::of(record);
            if !current_keys.contains(&key) {
                diff.removed.push(key);
            }
        }
        diff
    }
}

/// What one sync call produced.
#[derive(Debug)]
pub struct SyncOutcome {
    pub image: ElfImage,
    pub diff: SymbolDiff,
    /// Pass this as the base of the next delta sync.
    pub token: SnapshotToken,
}

/// One debugger-sync session. Owns the retained prior snapshot for the
/// duration of the session; not shared across unrelated sessions.
#[derive(Debug)]
pub struct SyncSession {
    config: ImageConfig,
    mode: SyncMode,
    retained: Option<SymbolSnapshot>,
}

impl SyncSession {
    pub fn new(config: ImageConfig, mode: SyncMode) -> Self {
        SyncSession {
            config,
            mode,
            retained: None,
        }
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Token of the snapshot the session currently retains, if any.
    pub fn retained_token(&self) -> Option<SnapshotToken> {
        self.retained.as_ref().map(|snapshot| snapshot.token())
    }

    /// Sync according to the configured mode. In delta mode the caller's
    /// base token is required once a snapshot is retained; the first call
    /// of a session performs a full resync.
    pub fn sync(&mut self, set: &SymbolSet, base: Option<SnapshotToken>) -> Result<SyncOutcome> {
        match (self.mode, base) {
            (SyncMode::Full, _) => self.full_sync(set),
            (SyncMode::Delta, Some(base)) => self.delta_sync(set, base),
            (SyncMode::Delta, None) => {
                if let Some(retained) = &self.retained {
                    Err(Error::StaleSnapshot {
                        supplied: None,
                        retained: Some(retained.token()),
                    })
                } else {
                    self.full_sync(set)
                }
            }
        }
    }

    /// Encode the entire current set; the retained snapshot advances.
    pub fn full_sync(&mut self, set: &SymbolSet) -> Result<SyncOutcome> {
        let snapshot = set.snapshot();
        let diff = match &self.retained {
            Some(previous) => SymbolDiff::between(previous, &snapshot),
            None => SymbolDiff {
                added: snapshot.records().to_vec(),
                ..SymbolDiff::default()
            },
        };
        let image = ElfImage::build(&snapshot, &self.config)?;
        let token = snapshot.token();
        debug!(
            "full sync: {} symbols, +{} -{} ~{}",
            snapshot.len(),
            diff.added.len(),
            diff.removed.len(),
            diff.modified.len()
        );
        self.retained = Some(snapshot);
        Ok(SyncOutcome { image, diff, token })
    }

    /// Encode only the changed subset plus carry-over references. Fails
    /// with [`Error::StaleSnapshot`] unless `base` matches the retained
    /// snapshot, so a delta is never computed against the wrong base.
    pub fn delta_sync(&mut self, set: &SymbolSet, base: SnapshotToken) -> Result<SyncOutcome> {
        let Some(previous) = &self.retained else {
            return Err(Error::StaleSnapshot {
                supplied: Some(base),
                retained: None,
            });
        };
        if previous.token() != base {
            return Err(Error::StaleSnapshot {
                supplied: Some(base),
                retained: Some(previous.token()),
            });
        }

        let snapshot = set.snapshot();
        let diff = SymbolDiff::between(previous, &snapshot);
        let subset = delta_subset(&snapshot, &diff);
        debug!(
            "delta sync: +{} -{} ~{}, encoding {} of {} symbols",
            diff.added.len(),
            diff.removed.len(),
            diff.modified.len(),
            subset.len(),
            snapshot.len()
        );
        let image = ElfImage::build(&subset, &self.config)?;
        let token = snapshot.token();
        self.retained = Some(snapshot);
        Ok(SyncOutcome { image, diff, token })
    }
}

/// The changed records plus, for each section holding a change, the
/// current extent anchors of that section. Keeping the minimum-address and
/// maximum-extent records in the subset makes the delta image's
/// descriptors cover the same ranges a full image would, so symbols loaded
/// from earlier images stay valid.
fn delta_subset(current: &SymbolSnapshot, diff: &SymbolDiff) -> SymbolSnapshot {
    let mut keep: HashSet<SymbolKey> = diff
        .added
        .iter()
        .chain(diff.modified.iter())
        .map(SymbolKey::of)
        .collect();

    let touched: HashSet<&str> = diff
        .added
        .iter()
        .chain(diff.modified.iter())
        .filter_map(|record| match &record.section {
            SectionRef::Named(name) => Some(name.as_str()),
            _ => None,
        })
        .collect();

    for name in touched {
        let mut members = current.iter().filter(|record| {
            matches!(&record.section, SectionRef::Named(n) if n.as_str() == name)
        });
        let Some(first) = members.next() else { continue };
        let mut lowest = first;
        let mut highest = first;
        for record in members {
            if record.value < lowest.value {
                lowest = record;
            }
            if record.extent_end() > highest.extent_end() {
                highest = record;
            }
        }
        keep.insert(SymbolKey::of(lowest));
        keep.insert(SymbolKey::of(highest));
    }

    let records = current
        .iter()
        .filter(|record| keep.contains(&SymbolKey::of(record)))
        .cloned()
        .collect();
    SymbolSnapshot::from_parts(records, current.token())
}
