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
use std::fmt::Debug;

use static_assertions::assert_obj_safe;

use crate::release::Release;

/// The namespace releases are read from when a driver has no namespace configured.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A predicate used to select releases in [`Driver::list`].
pub type Filter<'a> = &'a dyn Fn(&Release) -> bool;

/// A backend which persistently stores release revisions.
///
/// A `Driver` stores each revision of a release under its key, `<name>.v<version>`. Every object
/// a driver writes carries the ownership label, and no driver operation reads or modifies objects
/// without it.
///
/// Drivers are safe to share between threads. Concurrency control is left to the backend, except
/// where a driver documents otherwise.
pub trait Driver: Debug + Send + Sync {
    /// Return the name of this driver.
    fn name(&self) -> &'static str;

    /// Return the release stored under `key`.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no release with the given `key`.
    /// - `Error::Encoding`: The stored release could not be decoded.
    /// - `Error::Backend`: An error occurred in the backend.
    fn get(&self, key: &str) -> crate::Result<Release>;

    /// Return every stored release for which `filter` returns `true`.
    ///
    /// This returns an empty list rather than an error when no release matches.
    ///
    /// # Errors
    /// - `Error::Backend`: An error occurred in the backend.
    fn list(&self, filter: Filter<'_>) -> crate::Result<Vec<Release>>;

    /// Return every stored release whose labels include all of `labels`.
    ///
    /// # Errors
    /// - `Error::NotFound`: No release matches the given `labels`.
    /// - `Error::Validation`: A label in `labels` cannot be queried by this driver.
    /// - `Error::Backend`: An error occurred in the backend.
    fn query(&self, labels: &BTreeMap<String, String>) -> crate::Result<Vec<Release>>;

    /// Store `release` under `key`.
    ///
    /// # Errors
    /// - `Error::AlreadyExists`: There is already a release with the given `key`. The stored
    /// release is not modified.
    /// - `Error::Validation`: The custom labels of `release` cannot be stored.
    /// - `Error::Backend`: An error occurred in the backend.
    fn create(&self, key: &str, release: &Release) -> crate::Result<()>;

    /// Replace the release stored under `key` with `release`.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no release with the given `key`.
    /// - `Error::Validation`: The custom labels of `release` cannot be stored.
    /// - `Error::Backend`: An error occurred in the backend.
    fn update(&self, key: &str, release: &Release) -> crate::Result<()>;

    /// Remove the release stored under `key` and return it.
    ///
    /// # Errors
    /// - `Error::NotFound`: There is no release with the given `key`.
    /// - `Error::Backend`: An error occurred in the backend.
    fn delete(&self, key: &str) -> crate::Result<Release>;
}

assert_obj_safe!(Driver);

impl Driver for Box<dyn Driver> {
    fn name(&self) -> &'static str {
        self.as_ref().name()
    }

    fn get(&self, key: &str) -> crate::Result<Release> {
        self.as_ref().get(key)
    }

    fn list(&self, filter: Filter<'_>) -> crate::Result<Vec<Release>> {
        self.as_ref().list(filter)
    }

    fn query(&self, labels: &BTreeMap<String, String>) -> crate::Result<Vec<Release>> {
        self.as_ref().query(labels)
    }

    fn create(&self, key: &str, release: &Release) -> crate::Result<()> {
        self.as_ref().create(key, release)
    }

    fn update(&self, key: &str, release: &Release) -> crate::Result<()> {
        self.as_ref().update(key, release)
    }

    fn delete(&self, key: &str) -> crate::Result<Release> {
        self.as_ref().delete(key)
    }
}

/// Return the current time as a Unix timestamp, for the `createdAt` and `modifiedAt` labels.
pub(crate) fn timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
