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

//! A high-level interface for storing the history of releases.

use std::collections::BTreeMap;

use crate::driver::Driver;
use crate::labels::{NAME_LABEL, OWNER, OWNER_LABEL, STATUS_LABEL};
use crate::release::{make_key, sort_by_revision, Release, Status};

/// The configuration for a [`Storage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageConfig {
    /// The maximum number of revisions to keep for each release.
    ///
    /// When a new revision would exceed this, the oldest revisions are removed first. The most
    /// recent deployed revision is never removed. A value of `0` keeps every revision. The default
    /// value is `0`.
    pub max_history: usize,
}

/// A store for the revisions of releases, backed by a [`Driver`].
///
/// This addresses revisions by release name and version rather than by key, and implements
/// history pruning on top of the driver.
#[derive(Debug)]
pub struct Storage<D> {
    driver: D,
    config: StorageConfig,
}

impl<D: Driver> Storage<D> {
    /// Create a new `Storage` which stores releases in `driver`.
    pub fn new(driver: D, config: StorageConfig) -> Self {
        Storage { driver, config }
    }

    /// Return the driver this storage uses.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Return the configuration of this storage.
    pub fn config(&self) -> StorageConfig {
        self.config
    }

    /// Return revision `version` of the release `name`.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no such revision.
    /// - `Error::Encoding`: The stored release could not be decoded.
    /// - `Error::Backend`: An error occurred in the backend.
    pub fn get(&self, name: &str, version: u32) -> crate::Result<Release> {
        tracing::debug!(driver = self.driver.name(), name, version, "getting release");
        self.driver.get(&make_key(name, version))
    }

    /// Store a new revision.
    ///
    /// If the configured history limit would be exceeded, the oldest revisions of the release are
    /// removed first.
    ///
    /// # Errors
    /// - `Error::AlreadyExists`: This revision already exists.
    /// - `Error::Validation`: The custom labels of `release` cannot be stored.
    /// - `Error::Backend`: An error occurred in the backend.
    pub fn create(&self, release: &Release) -> crate::Result<()> {
        tracing::debug!(
            driver = self.driver.name(),
            name = %release.name,
            version = release.version,
            "creating release"
        );
        if self.config.max_history > 0 {
            // The new revision takes up one slot.
            match self.remove_least_recent(&release.name, self.config.max_history - 1) {
                Ok(()) | Err(crate::Error::NotFound) => {}
                Err(error) => return Err(error),
            }
        }
        self.driver.create(&release.key(), release)
    }

    /// Replace an existing revision.
    ///
    /// # Errors
    /// - `Error::NotFound`: This revision does not exist.
    /// - `Error::Validation`: The custom labels of `release` cannot be stored.
    /// - `Error::Backend`: An error occurred in the backend.
    pub fn update(&self, release: &Release) -> crate::Result<()> {
        tracing::debug!(
            driver = self.driver.name(),
            name = %release.name,
            version = release.version,
            "updating release"
        );
        self.driver.update(&release.key(), release)
    }

    /// Remove revision `version` of the release `name` and return it.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no such revision.
    /// - `Error::Backend`: An error occurred in the backend.
    pub fn delete(&self, name: &str, version: u32) -> crate::Result<Release> {
        tracing::debug!(driver = self.driver.name(), name, version, "deleting release");
        self.driver.delete(&make_key(name, version))
    }

    /// Return every stored revision.
    pub fn list_releases(&self) -> crate::Result<Vec<Release>> {
        tracing::debug!(driver = self.driver.name(), "listing all releases");
        self.driver.list(&|_| true)
    }

    /// Return every revision with the `uninstalled` status.
    pub fn list_uninstalled(&self) -> crate::Result<Vec<Release>> {
        tracing::debug!(driver = self.driver.name(), "listing uninstalled releases");
        self.driver
            .list(&|release| release.info.status == Status::Uninstalled)
    }

    /// Return every revision with the `deployed` status.
    pub fn list_deployed(&self) -> crate::Result<Vec<Release>> {
        tracing::debug!(driver = self.driver.name(), "listing deployed releases");
        self.driver
            .list(&|release| release.info.status == Status::Deployed)
    }

    /// Return the most recent deployed revision of the release `name`.
    ///
    /// Normally only one revision is deployed, but if several are, the newest one is returned.
    ///
    /// # Errors
    /// - `Error::NotFound`: The release has no deployed revision.
    /// - `Error::Backend`: An error occurred in the backend.
    pub fn deployed(&self, name: &str) -> crate::Result<Release> {
        let mut releases = self.deployed_all(name)?;
        sort_by_revision(&mut releases);
        releases.pop().ok_or(crate::Error::NotFound)
    }

    /// Return every deployed revision of the release `name`.
    ///
    /// # Errors
    /// - `Error::NotFound`: The release has no deployed revision.
    /// - `Error::Backend`: An error occurred in the backend.
    pub fn deployed_all(&self, name: &str) -> crate::Result<Vec<Release>> {
        tracing::debug!(driver = self.driver.name(), name, "getting deployed releases");
        let mut labels = self.release_labels(name);
        labels.insert(
            STATUS_LABEL.to_string(),
            Status::Deployed.as_str().to_string(),
        );
        let releases = self.driver.query(&labels)?;
        if releases.is_empty() {
            return Err(crate::Error::NotFound);
        }
        Ok(releases)
    }

    /// Return every revision of the release `name`.
    ///
    /// # Errors
    /// - `Error::NotFound`: The release has no revisions.
    /// - `Error::Backend`: An error occurred in the backend.
    pub fn history(&self, name: &str) -> crate::Result<Vec<Release>> {
        tracing::debug!(driver = self.driver.name(), name, "getting release history");
        self.driver.query(&self.release_labels(name))
    }

    /// Return the revision of the release `name` with the highest version.
    ///
    /// # Errors
    /// - `Error::NotFound`: The release has no revisions.
    /// - `Error::Backend`: An error occurred in the backend.
    pub fn last(&self, name: &str) -> crate::Result<Release> {
        let mut history = self.history(name)?;
        sort_by_revision(&mut history);
        history.pop().ok_or(crate::Error::NotFound)
    }

    fn release_labels(&self, name: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(NAME_LABEL.to_string(), name.to_string());
        labels.insert(OWNER_LABEL.to_string(), OWNER.to_string());
        labels
    }

    /// Remove the oldest revisions of the release `name` until at most `max` remain.
    ///
    /// The most recent deployed revision is kept even if that leaves more than `max` revisions.
    /// Every removal is attempted even if one fails, and the first error is returned.
    fn remove_least_recent(&self, name: &str, max: usize) -> crate::Result<()> {
        let mut history = self.history(name)?;
        if history.len() <= max {
            return Ok(());
        }
        sort_by_revision(&mut history);

        let last_deployed = match self.deployed(name) {
            Ok(release) => Some(release.version),
            Err(crate::Error::NotFound) => None,
            Err(error) => return Err(error),
        };

        let excess = history.len() - max;
        let to_delete = history
            .iter()
            .filter(|release| Some(release.version) != last_deployed)
            .take(excess)
            .map(|release| release.version)
            .collect::<Vec<_>>();

        let mut first_error = None;
        let mut error_count = 0usize;
        for version in to_delete {
            tracing::debug!(name, version, "pruning release history");
            if let Err(error) = self.driver.delete(&make_key(name, version)) {
                tracing::warn!(name, version, %error, "could not prune release");
                error_count += 1;
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            None => Ok(()),
            Some(error) => {
                if error_count > 1 {
                    tracing::warn!(name, error_count, "several revisions could not be pruned");
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;

    fn release(name: &str, version: u32, status: Status) -> Release {
        let mut release = Release {
            name: name.into(),
            version,
            namespace: "default".into(),
            ..Release::default()
        };
        release.info.status = status;
        release
    }

    fn storage(max_history: usize) -> Storage<MemoryDriver> {
        Storage::new(MemoryDriver::new(), StorageConfig { max_history })
    }

    fn versions(mut releases: Vec<Release>) -> Vec<u32> {
        sort_by_revision(&mut releases);
        releases.into_iter().map(|release| release.version).collect()
    }

    #[test]
    fn get_and_delete_by_name_and_version() {
        let storage = storage(0);
        let rls = release("wordpress", 1, Status::Deployed);
        storage.create(&rls).unwrap();
        assert_eq!(storage.get("wordpress", 1).unwrap(), rls);
        assert_eq!(storage.delete("wordpress", 1).unwrap(), rls);
        assert!(matches!(
            storage.get("wordpress", 1),
            Err(crate::Error::NotFound)
        ));
    }

    #[test]
    fn listings_filter_by_status() {
        let storage = storage(0);
        storage
            .create(&release("wordpress", 1, Status::Superseded))
            .unwrap();
        storage
            .create(&release("wordpress", 2, Status::Deployed))
            .unwrap();
        storage
            .create(&release("redis", 1, Status::Uninstalled))
            .unwrap();

        assert_eq!(storage.list_releases().unwrap().len(), 3);
        assert_eq!(storage.list_deployed().unwrap()[0].name, "wordpress");
        assert_eq!(storage.list_uninstalled().unwrap()[0].name, "redis");
    }

    #[test]
    fn deployed_returns_newest_deployed_revision() {
        let storage = storage(0);
        storage
            .create(&release("wordpress", 1, Status::Deployed))
            .unwrap();
        storage
            .create(&release("wordpress", 2, Status::Deployed))
            .unwrap();
        storage
            .create(&release("wordpress", 3, Status::Failed))
            .unwrap();

        assert_eq!(storage.deployed("wordpress").unwrap().version, 2);
        assert_eq!(versions(storage.deployed_all("wordpress").unwrap()), vec![1, 2]);
        assert_eq!(storage.last("wordpress").unwrap().version, 3);
        assert!(matches!(
            storage.deployed("redis"),
            Err(crate::Error::NotFound)
        ));
    }

    #[test]
    fn history_is_per_release() {
        let storage = storage(0);
        storage
            .create(&release("wordpress", 1, Status::Superseded))
            .unwrap();
        storage
            .create(&release("wordpress", 2, Status::Deployed))
            .unwrap();
        storage
            .create(&release("redis", 1, Status::Deployed))
            .unwrap();

        assert_eq!(versions(storage.history("wordpress").unwrap()), vec![1, 2]);
        assert!(matches!(
            storage.history("mysql"),
            Err(crate::Error::NotFound)
        ));
    }

    #[test]
    fn create_prunes_oldest_revisions() {
        let storage = storage(3);
        for version in 1..=5 {
            storage
                .create(&release("wordpress", version, Status::Superseded))
                .unwrap();
        }
        assert_eq!(versions(storage.history("wordpress").unwrap()), vec![3, 4, 5]);
    }

    #[test]
    fn pruning_keeps_last_deployed_revision() {
        let storage = storage(2);
        storage
            .create(&release("wordpress", 1, Status::Deployed))
            .unwrap();
        storage
            .create(&release("wordpress", 2, Status::Failed))
            .unwrap();
        storage
            .create(&release("wordpress", 3, Status::Failed))
            .unwrap();
        storage
            .create(&release("wordpress", 4, Status::Failed))
            .unwrap();

        assert_eq!(versions(storage.history("wordpress").unwrap()), vec![1, 4]);
    }
}
