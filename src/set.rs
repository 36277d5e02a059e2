//! The ordered symbol collection a caller mutates across a sync session.

use crate::error::{Error, Result};
use crate::symbol::{SectionRef, SymbolRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a record inside a set: symbol name plus section reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolKey {
    pub name: String,
    pub section: SectionRef,
}

impl SymbolKey {
    pub fn of(record: &SymbolRecord) -> Self {
        SymbolKey {
            name: record.name.clone(),
            section: record.section.clone(),
        }
    }
}

/// Opaque identity of one snapshot. Delta syncs present this to prove they
/// are diffing against the base the session actually retains.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SnapshotToken {
    set_id: u64,
    generation: u64,
}

// Distinct ids keep tokens from unrelated sets from ever comparing equal.
static NEXT_SET_ID: AtomicU64 = AtomicU64::new(1);

/// Ordered mapping from (name, section) to symbol records. Insertion order
/// is preserved and observable in the encoded symbol table; keys are
/// unique.
#[derive(Debug)]
pub struct SymbolSet {
    records: Vec<SymbolRecord>,
    index: HashMap<SymbolKey, usize>,
    set_id: u64,
    generation: u64,
}

impl SymbolSet {
    pub fn new() -> Self {
        SymbolSet {
            records: Vec::new(),
            index: HashMap::new(),
            set_id: NEXT_SET_ID.fetch_add(1, Ordering::Relaxed),
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SymbolRecord> {
        self.records.iter()
    }

    pub fn get(&self, name: &str, section: &SectionRef) -> Option<&SymbolRecord> {
        let key = SymbolKey {
            name: name.to_string(),
            section: section.clone(),
        };
        self.index.get(&key).map(|&i| &self.records[i])
    }

    /// Insert a record. If the (name, section) key already exists the call
    /// fails with [`Error::DuplicateSymbol`] unless `overwrite` is set, in
    /// which case the value is replaced in place, keeping the original
    /// insertion position.
    pub fn add(&mut self, record: SymbolRecord, overwrite: bool) -> Result<()> {
        record.validate()?;
        let key = SymbolKey::of(&record);
        match self.index.get(&key) {
            Some(&i) if overwrite => {
                self.records[i] = record;
            }
            Some(_) => {
                return Err(Error::DuplicateSymbol {
                    name: key.name,
                    section: key.section.to_string(),
                });
            }
            None => {
                self.index.insert(key, self.records.len());
                self.records.push(record);
            }
        }
        self.generation += 1;
        Ok(())
    }

    /// Remove and return the record under (name, section); fails with
    /// [`Error::NotFound`] if absent.
    pub fn remove(&mut self, name: &str, section: &SectionRef) -> Result<SymbolRecord> {
        let key = SymbolKey {
            name: name.to_string(),
            section: section.clone(),
        };
        let Some(i) = self.index.remove(&key) else {
            return Err(Error::NotFound {
                name: key.name,
                section: key.section.to_string(),
            });
        };
        let record = self.records.remove(i);
        for idx in self.index.values_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        self.generation += 1;
        Ok(record)
    }

    /// An immutable ordered view of the current contents, used by the
    /// downstream stages.
    pub fn snapshot(&self) -> SymbolSnapshot {
        SymbolSnapshot {
            records: self.records.clone(),
            token: self.token(),
        }
    }

    /// The token a snapshot taken right now would carry.
    pub fn token(&self) -> SnapshotToken {
        SnapshotToken {
            set_id: self.set_id,
            generation: self.generation,
        }
    }
}

impl Default for SymbolSet {
    fn default() -> Self {
        SymbolSet::new()
    }
}

/// Immutable, ordered view of a [`SymbolSet`] at one generation.
#[derive(Debug, Clone)]
pub struct SymbolSnapshot {
    records: Vec<SymbolRecord>,
    token: SnapshotToken,
}

impl SymbolSnapshot {
    /// A view over a subset of another snapshot's records, sharing its
    /// token. Used by delta encoding.
    pub(crate) fn from_parts(records: Vec<SymbolRecord>, token: SnapshotToken) -> Self {
        SymbolSnapshot { records, token }
    }

    pub fn token(&self) -> SnapshotToken {
        self.token
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SymbolRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &SymbolRecord> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolBinding;

    #[test]
    fn add_rejects_duplicates_unless_overwriting() {
        let mut set = SymbolSet::new();
        set.add(SymbolRecord::function("kmalloc", 0x1000, 64), false)
            .unwrap();

        let dup = SymbolRecord::function("kmalloc", 0x2000, 32);
        assert!(matches!(
            set.add(dup.clone(), false),
            Err(Error::DuplicateSymbol { .. })
        ));

        set.add(dup, true).unwrap();
        let got = set
            .get("kmalloc", &SectionRef::named(".text"))
            .unwrap();
        assert_eq!(got.value, 0x2000);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn overwrite_keeps_original_position() {
        let mut set = SymbolSet::new();
        set.add(SymbolRecord::function("first", 0x1000, 8), false)
            .unwrap();
        set.add(SymbolRecord::function("second", 0x2000, 8), false)
            .unwrap();
        set.add(SymbolRecord::function("first", 0x3000, 8), true)
            .unwrap();

        let names: Vec<_> = set.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
        assert_eq!(set.iter().next().unwrap().value, 0x3000);
    }

    #[test]
    fn same_name_different_section_is_a_distinct_key() {
        let mut set = SymbolSet::new();
        set.add(SymbolRecord::function("init", 0x1000, 8), false)
            .unwrap();
        set.add(
            SymbolRecord::function("init", 0x8000, 8).in_section(".init.text"),
            false,
        )
        .unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn remove_missing_is_not_found() {
        let mut set = SymbolSet::new();
        assert!(matches!(
            set.remove("ghost", &SectionRef::named(".text")),
            Err(Error::NotFound { .. })
        ));

        set.add(SymbolRecord::function("real", 0x1000, 8), false)
            .unwrap();
        let removed = set.remove("real", &SectionRef::named(".text")).unwrap();
        assert_eq!(removed.name, "real");
        assert!(set.is_empty());
    }

    #[test]
    fn remove_reindexes_later_records() {
        let mut set = SymbolSet::new();
        for (name, value) in [("a", 0x1000u64), ("b", 0x2000), ("c", 0x3000)] {
            set.add(SymbolRecord::function(name, value, 8), false)
                .unwrap();
        }
        set.remove("a", &SectionRef::named(".text")).unwrap();
        let c = set.get("c", &SectionRef::named(".text")).unwrap();
        assert_eq!(c.value, 0x3000);
        let names: Vec<_> = set.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["b", "c"]);
    }

    #[test]
    fn tokens_track_mutations_and_differ_across_sets() {
        let mut set = SymbolSet::new();
        let t0 = set.token();
        set.add(SymbolRecord::function("f", 0x1000, 8), false)
            .unwrap();
        let t1 = set.token();
        assert_ne!(t0, t1);

        let other = SymbolSet::new();
        assert_ne!(set.token(), other.token());
        assert_ne!(t0, other.token());
    }

    #[test]
    fn snapshot_is_ordered_and_detached() {
        let mut set = SymbolSet::new();
        set.add(SymbolRecord::function("f", 0x1000, 8), false)
            .unwrap();
        set.add(
            SymbolRecord::object("g", 0x2000, 8).with_binding(SymbolBinding::Local),
            false,
        )
        .unwrap();

        let snap = set.snapshot();
        set.remove("f", &SectionRef::named(".text")).unwrap();

        assert_eq!(snap.len(), 2);
        let names: Vec<_> = snap.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["f", "g"]);
        assert_ne!(snap.token(), set.token());
    }

    #[test]
    fn add_validates_records() {
        let mut set = SymbolSet::new();
        assert!(matches!(
            set.add(SymbolRecord::function("", 0x1000, 8), false),
            Err(Error::InvalidRecord { .. })
        ));
        assert!(set.is_empty());
    }
}
