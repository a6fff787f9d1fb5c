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

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{ClientError, ClientResult, ObjectClient, StoredObject};

/// An `ObjectClient` which stores objects in memory.
///
/// Clones of a `MemoryObjects` share the same objects, so several drivers can be pointed at the
/// same namespace. An optional size limit rejects objects whose data exceeds it, like backends
/// which cap the size of an object.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjects {
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    size_limit: Option<usize>,
}

impl MemoryObjects {
    /// Create a new empty `MemoryObjects` with no size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty `MemoryObjects` which rejects objects larger than `limit` bytes.
    pub fn with_size_limit(limit: usize) -> Self {
        MemoryObjects {
            objects: Arc::default(),
            size_limit: Some(limit),
        }
    }

    /// Return the names of all stored objects in order.
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Return the number of stored objects.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Return whether there are no stored objects.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_size(&self, object: &StoredObject) -> ClientResult<()> {
        match self.size_limit {
            Some(limit) if object.size() > limit => Err(ClientError::TooLarge {
                size: object.size(),
                limit,
            }),
            _ => Ok(()),
        }
    }
}

impl ObjectClient for MemoryObjects {
    fn get(&self, name: &str) -> ClientResult<Option<StoredObject>> {
        Ok(self.read().get(name).cloned())
    }

    fn create(&self, object: &StoredObject) -> ClientResult<()> {
        self.check_size(object)?;
        let mut objects = self.write();
        if objects.contains_key(&object.name) {
            return Err(ClientError::AlreadyExists);
        }
        objects.insert(object.name.clone(), object.clone());
        Ok(())
    }

    fn update(&self, object: &StoredObject) -> ClientResult<()> {
        self.check_size(object)?;
        match self.write().get_mut(&object.name) {
            Some(existing) => {
                *existing = object.clone();
                Ok(())
            }
            None => Err(ClientError::NotFound),
        }
    }

    fn delete(&self, name: &str) -> ClientResult<()> {
        self.write()
            .remove(name)
            .map(|_| ())
            .ok_or(ClientError::NotFound)
    }

    fn list(&self, selector: &BTreeMap<String, String>) -> ClientResult<Vec<StoredObject>> {
        Ok(self
            .read()
            .values()
            .filter(|object| {
                selector
                    .iter()
                    .all(|(key, value)| object.labels.get(key) == Some(value))
            })
            .cloned()
            .collect())
    }
}
