/*
 * Copyright 2019-2022 Wren Powell
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::labels::Labels;
use crate::release::Release;

/// A stored release together with the labels it is indexed by.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// The version of the release.
    pub version: u32,

    /// The system and custom labels of the release.
    pub labels: Labels,

    /// The stored release.
    pub release: Release,
}

/// An index into the arena of a [`Records`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Handle(usize);

/// The revisions of a single release, ordered by version.
///
/// Records live in an arena and are found through a list of handles kept sorted by version, so
/// lookups are `O(log n)` and removed slots are reused by later inserts.
#[derive(Debug, Clone, Default)]
pub struct Records {
    arena: Vec<Option<Record>>,
    free: Vec<usize>,
    index: Vec<(u32, Handle)>,
}

impl Records {
    fn position(&self, version: u32) -> Result<usize, usize> {
        self.index
            .binary_search_by_key(&version, |(version, _)| *version)
    }

    fn slot(&self, handle: Handle) -> &Record {
        self.arena[handle.0]
            .as_ref()
            .expect("Record index points to an empty slot.")
    }

    /// Insert `record`.
    ///
    /// # Errors
    /// - `Error::AlreadyExists`: There is already a record with the same version.
    pub fn add(&mut self, record: Record) -> crate::Result<()> {
        let position = match self.position(record.version) {
            Ok(_) => return Err(crate::Error::AlreadyExists),
            Err(position) => position,
        };
        let version = record.version;
        let handle = match self.free.pop() {
            Some(slot) => {
                self.arena[slot] = Some(record);
                Handle(slot)
            }
            None => {
                self.arena.push(Some(record));
                Handle(self.arena.len() - 1)
            }
        };
        self.index.insert(position, (version, handle));
        Ok(())
    }

    /// Return the record with the given `version`.
    pub fn get(&self, version: u32) -> Option<&Record> {
        let position = self.position(version).ok()?;
        Some(self.slot(self.index[position].1))
    }

    /// Replace the record with the same version as `record` and return the old one.
    ///
    /// If there is no such record, `record` is not inserted and `None` is returned.
    pub fn replace(&mut self, record: Record) -> Option<Record> {
        let position = self.position(record.version).ok()?;
        let Handle(slot) = self.index[position].1;
        self.arena[slot].replace(record)
    }

    /// Remove the record with the given `version` and return it.
    pub fn remove(&mut self, version: u32) -> Option<Record> {
        let position = self.position(version).ok()?;
        let (_, Handle(slot)) = self.index.remove(position);
        self.free.push(slot);
        self.arena[slot].take()
    }

    /// Return an iterator over the records in ascending version order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> + '_ {
        self.index.iter().map(move |(_, handle)| self.slot(*handle))
    }

    /// Return whether there are no records.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: u32) -> Record {
        Record {
            version,
            labels: Labels::default(),
            release: Release {
                name: "test".into(),
                version,
                ..Release::default()
            },
        }
    }

    #[test]
    fn records_iterate_in_version_order() {
        let mut records = Records::default();
        for version in [3, 1, 4, 2] {
            records.add(record(version)).unwrap();
        }
        let versions = records.iter().map(|record| record.version).collect::<Vec<_>>();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let mut records = Records::default();
        records.add(record(1)).unwrap();
        assert!(matches!(
            records.add(record(1)),
            Err(crate::Error::AlreadyExists)
        ));
        assert_eq!(records.iter().count(), 1);
    }

    #[test]
    fn removed_slots_are_reused() {
        let mut records = Records::default();
        records.add(record(1)).unwrap();
        records.add(record(2)).unwrap();
        assert_eq!(records.remove(1).map(|record| record.version), Some(1));
        records.add(record(5)).unwrap();

        assert_eq!(records.arena.len(), 2);
        assert!(records.get(1).is_none());
        assert_eq!(records.get(5).map(|record| record.release.version), Some(5));
        assert_eq!(records.iter().count(), 2);
    }

    #[test]
    fn replace_requires_existing_record() {
        let mut records = Records::default();
        assert!(records.replace(record(1)).is_none());
        assert!(records.is_empty());

        records.add(record(1)).unwrap();
        let mut updated = record(1);
        updated.release.manifest = String::from("kind: ConfigMap");
        assert!(records.replace(updated).is_some());
        assert_eq!(records.get(1).unwrap().release.manifest, "kind: ConfigMap");
    }
}
