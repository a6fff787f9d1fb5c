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

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::labels::{self, Labels, CREATED_AT_LABEL, MODIFIED_AT_LABEL, OWNER, OWNER_LABEL};
use crate::release::{parse_key, Release};

use super::common::{timestamp, Driver, Filter, DEFAULT_NAMESPACE};
use super::open_driver::OpenDriver;
use super::records::{Record, Records};

/// The releases in one namespace, grouped by release name.
type Namespace = HashMap<String, Records>;

/// The configuration for opening a [`MemoryDriver`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryConfig {
    /// The namespace to read releases from and to restrict listings to.
    ///
    /// If this is `None`, reads use the `default` namespace and listings span every namespace.
    pub namespace: Option<String>,
}

impl MemoryConfig {
    /// Create a new `MemoryConfig` with no namespace.
    pub fn new() -> Self {
        Self::default()
    }
}

impl OpenDriver for MemoryConfig {
    type Driver = MemoryDriver;

    fn open(&self) -> crate::Result<Self::Driver> {
        Ok(MemoryDriver {
            namespace: self.namespace.clone(),
            cache: RwLock::new(HashMap::new()),
        })
    }
}

/// A `Driver` which stores releases in memory.
///
/// Unlike other drivers, releases in a `MemoryDriver` are not stored persistently and are only
/// accessible to the current process. This driver is useful for testing.
///
/// The whole driver is guarded by a single reader-writer lock, so reads run concurrently while
/// writes are serialized across all keys. There is no limit on the size of a release.
#[derive(Debug)]
pub struct MemoryDriver {
    namespace: Option<String>,
    cache: RwLock<HashMap<String, Namespace>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// Create a new empty `MemoryDriver` with no namespace.
    pub fn new() -> Self {
        MemoryDriver {
            namespace: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Set the namespace this driver reads from.
    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        let namespace = namespace.into();
        self.namespace = if namespace.is_empty() {
            None
        } else {
            Some(namespace)
        };
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Namespace>> {
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Namespace>> {
        self.cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The namespace single-release operations act on.
    fn read_namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Call `visit` with every record which is visible to listings.
    fn for_each_record(
        &self,
        cache: &HashMap<String, Namespace>,
        mut visit: impl FnMut(&Record),
    ) {
        let namespaces = cache
            .iter()
            .filter(|(name, _)| match &self.namespace {
                Some(namespace) => *name == namespace,
                None => true,
            })
            .map(|(_, namespace)| namespace);

        for namespace in namespaces {
            for records in namespace.values() {
                records
                    .iter()
                    .filter(|record| record.labels.get(OWNER_LABEL) == Some(OWNER))
                    .for_each(&mut visit);
            }
        }
    }
}

/// Return the namespace a release is written to.
fn release_namespace(release: &Release) -> String {
    if release.namespace.is_empty() {
        DEFAULT_NAMESPACE.to_string()
    } else {
        release.namespace.clone()
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "Memory"
    }

    fn get(&self, key: &str) -> crate::Result<Release> {
        let (name, version) = parse_key(key)?;
        let cache = self.read();
        cache
            .get(self.read_namespace())
            .and_then(|namespace| namespace.get(name))
            .and_then(|records| records.get(version))
            .map(|record| record.release.clone())
            .ok_or(crate::Error::NotFound)
    }

    fn list(&self, filter: Filter<'_>) -> crate::Result<Vec<Release>> {
        let cache = self.read();
        let mut releases = Vec::new();
        self.for_each_record(&cache, |record| {
            if filter(&record.release) {
                releases.push(record.release.clone());
            }
        });
        Ok(releases)
    }

    fn query(&self, labels: &BTreeMap<String, String>) -> crate::Result<Vec<Release>> {
        let cache = self.read();
        let mut releases = Vec::new();
        self.for_each_record(&cache, |record| {
            if record.labels.matches(labels) {
                releases.push(record.release.clone());
            }
        });

        if releases.is_empty() {
            return Err(crate::Error::NotFound);
        }
        Ok(releases)
    }

    fn create(&self, key: &str, release: &Release) -> crate::Result<()> {
        labels::validate_custom_labels(&release.labels)?;
        let (name, version) = parse_key(key)?;

        let record = Record {
            version,
            labels: Labels::builder()
                .custom(&release.labels)
                .system(release)
                .set(CREATED_AT_LABEL, timestamp())
                .build(),
            release: release.clone(),
        };

        let mut cache = self.write();
        cache
            .entry(release_namespace(release))
            .or_default()
            .entry(name.to_string())
            .or_default()
            .add(record)
    }

    fn update(&self, key: &str, release: &Release) -> crate::Result<()> {
        labels::validate_custom_labels(&release.labels)?;
        let (name, version) = parse_key(key)?;

        let mut cache = self.write();
        let records = cache
            .get_mut(&release_namespace(release))
            .and_then(|namespace| namespace.get_mut(name))
            .ok_or(crate::Error::NotFound)?;
        let created_at = records
            .get(version)
            .ok_or(crate::Error::NotFound)?
            .labels
            .get(CREATED_AT_LABEL)
            .map(str::to_string);

        let mut builder = Labels::builder()
            .custom(&release.labels)
            .system(release)
            .set(MODIFIED_AT_LABEL, timestamp());
        if let Some(created_at) = created_at {
            builder = builder.set(CREATED_AT_LABEL, created_at);
        }

        records.replace(Record {
            version,
            labels: builder.build(),
            release: release.clone(),
        });
        Ok(())
    }

    fn delete(&self, key: &str) -> crate::Result<Release> {
        let (name, version) = parse_key(key)?;
        let namespace_name = self.read_namespace().to_string();

        let mut cache = self.write();
        let namespace = cache
            .get_mut(&namespace_name)
            .ok_or(crate::Error::NotFound)?;
        let records = namespace.get_mut(name).ok_or(crate::Error::NotFound)?;
        let record = records.remove(version).ok_or(crate::Error::NotFound)?;

        if records.is_empty() {
            namespace.remove(name);
        }
        if namespace.is_empty() {
            cache.remove(&namespace_name);
        }

        Ok(record.release)
    }
}
