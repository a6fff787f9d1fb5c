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

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Blob, BlobClient, ClientError, ClientResult, Listing, PutCondition};

/// The separator between path segments.
const SEPARATOR: char = '/';

/// A `BlobClient` which stores blobs in memory.
///
/// Clones of a `MemoryBlobs` share the same blobs.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobs {
    blobs: Arc<RwLock<BTreeMap<String, Blob>>>,
}

impl MemoryBlobs {
    /// Create a new empty `MemoryBlobs`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the paths of all stored blobs in order.
    pub fn paths(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Blob>> {
        self.blobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Blob>> {
        self.blobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Split the `paths` directly under `prefix` from the common prefixes below it.
pub(super) fn list_level<'a>(prefix: &str, paths: impl Iterator<Item = &'a str>) -> Listing {
    let mut listing = Listing::default();
    let mut prefixes = BTreeSet::new();
    for path in paths {
        let rest = match path.strip_prefix(prefix) {
            Some(rest) => rest,
            None => continue,
        };
        match rest.find(SEPARATOR) {
            Some(index) => {
                prefixes.insert(format!("{}{}", prefix, &rest[..=index]));
            }
            None => listing.paths.push(path.to_string()),
        }
    }
    listing.prefixes = prefixes.into_iter().collect();
    listing
}

impl BlobClient for MemoryBlobs {
    fn get(&self, path: &str) -> ClientResult<Option<Blob>> {
        Ok(self.read().get(path).cloned())
    }

    fn head(&self, path: &str) -> ClientResult<Option<BTreeMap<String, String>>> {
        Ok(self.read().get(path).map(|blob| blob.metadata.clone()))
    }

    fn put(&self, path: &str, blob: &Blob, condition: PutCondition) -> ClientResult<()> {
        let mut blobs = self.write();
        if condition == PutCondition::IfAbsent && blobs.contains_key(path) {
            return Err(ClientError::AlreadyExists);
        }
        blobs.insert(path.to_string(), blob.clone());
        Ok(())
    }

    fn delete(&self, path: &str) -> ClientResult<()> {
        self.write()
            .remove(path)
            .map(|_| ())
            .ok_or(ClientError::NotFound)
    }

    fn list(&self, prefix: &str) -> ClientResult<Listing> {
        let blobs = self.read();
        Ok(list_level(prefix, blobs.keys().map(String::as_str)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_separates_blobs_from_prefixes() {
        let blobs = MemoryBlobs::new();
        for path in [
            "releases/default/a.v1",
            "releases/default/b.v1",
            "releases/kube-system/c.v1",
            "releases/top",
            "other/default/d.v1",
        ] {
            blobs
                .put(path, &Blob::default(), PutCondition::Overwrite)
                .unwrap();
        }

        let listing = blobs.list("releases/").unwrap();
        assert_eq!(listing.paths, vec!["releases/top".to_string()]);
        assert_eq!(
            listing.prefixes,
            vec![
                "releases/default/".to_string(),
                "releases/kube-system/".to_string()
            ]
        );

        let listing = blobs.list("releases/default/").unwrap();
        assert_eq!(listing.paths.len(), 2);
        assert!(listing.prefixes.is_empty());
    }

    #[test]
    fn conditional_put_does_not_overwrite() {
        let blobs = MemoryBlobs::new();
        let first = Blob {
            body: b"first".to_vec(),
            ..Blob::default()
        };
        let second = Blob {
            body: b"second".to_vec(),
            ..Blob::default()
        };
        blobs.put("a", &first, PutCondition::IfAbsent).unwrap();
        assert!(matches!(
            blobs.put("a", &second, PutCondition::IfAbsent),
            Err(ClientError::AlreadyExists)
        ));
        assert_eq!(blobs.get("a").unwrap(), Some(first));
    }
}
