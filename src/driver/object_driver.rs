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

use crate::client::{ClientError, ObjectClient, StoredObject};
use crate::labels::{
    self, Labels, LabelsBuilder, CREATED_AT_LABEL, MODIFIED_AT_LABEL, OWNER, OWNER_LABEL,
};
use crate::release::{decode, encode, Release};

use super::chunking::CHUNK_LABELS;
use super::common::{timestamp, Driver, Filter};
use super::open_driver::OpenDriver;

/// The data field of a stored object which holds the encoded release.
pub(super) const RELEASE_FIELD: &str = "release";

/// The kind of object a size-limited driver stores releases in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Releases are stored in config maps.
    ConfigMap,

    /// Releases are stored in secrets.
    Secret,
}

impl ObjectKind {
    /// The driver name for this kind of object.
    pub fn driver_name(self) -> &'static str {
        match self {
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::Secret => "Secret",
        }
    }
}

/// Translate an error from an `ObjectClient`.
pub(super) fn client_error(operation: &'static str, key: &str, error: ClientError) -> crate::Error {
    match error {
        ClientError::NotFound => crate::Error::NotFound,
        ClientError::AlreadyExists => crate::Error::AlreadyExists,
        error => crate::Error::backend(operation, key, error),
    }
}

/// Return the labels shared by every driver which stores releases as objects.
pub(super) fn release_labels(release: &Release) -> LabelsBuilder {
    Labels::builder().custom(&release.labels).system(release)
}

/// Return the custom labels among the labels of a stored object.
pub(super) fn custom_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels::filter_system_labels(labels)
        .into_iter()
        .filter(|(key, _)| !CHUNK_LABELS.contains(&key.as_str()))
        .collect()
}

/// Check that the custom labels of `release` can be stored in an object.
pub(super) fn validate_labels(release: &Release) -> crate::Result<()> {
    labels::validate_custom_labels(&release.labels)?;
    if let Some(key) = release
        .labels
        .keys()
        .find(|key| CHUNK_LABELS.contains(&key.as_str()))
    {
        return Err(crate::Error::Validation(format!(
            "label {:?} is reserved for the storage driver",
            key
        )));
    }
    Ok(())
}

/// Return the selector for a query on `labels`, or `None` if no owned object can match.
///
/// The ownership label is always part of the selector.
pub(super) fn query_selector(
    labels: &BTreeMap<String, String>,
) -> crate::Result<Option<BTreeMap<String, String>>> {
    for (key, value) in labels {
        if !labels::is_valid_label_value(value) {
            return Err(crate::Error::Validation(format!(
                "invalid value {:?} for label {:?}",
                value, key
            )));
        }
    }
    match labels.get(OWNER_LABEL) {
        Some(owner) if owner != OWNER => return Ok(None),
        _ => {}
    }
    let mut selector = labels.clone();
    selector.insert(OWNER_LABEL.to_string(), OWNER.to_string());
    Ok(Some(selector))
}

/// Decode the release stored in `payload` and restore its custom labels from `object`.
pub(super) fn restore_release(object: &StoredObject, payload: &[u8]) -> crate::Result<Release> {
    let mut release = decode(payload)?;
    release.labels = custom_labels(&object.labels);
    Ok(release)
}

/// The configuration for opening an [`ObjectDriver`].
#[derive(Debug, Clone)]
pub struct ObjectConfig<C> {
    /// The client for the namespace to store releases in.
    pub client: C,

    /// The kind of object to store releases in.
    pub kind: ObjectKind,
}

impl<C: ObjectClient + Clone + 'static> OpenDriver for ObjectConfig<C> {
    type Driver = ObjectDriver<C>;

    fn open(&self) -> crate::Result<Self::Driver> {
        Ok(ObjectDriver::new(self.client.clone(), self.kind))
    }
}

/// A `Driver` which stores each release in a single labeled object.
///
/// Every operation is one round trip to the backend, except `delete`, which reads the release
/// before removing it. Releases whose encoded form is larger than the backend allows cannot be
/// stored; use [`ChunkedObjectDriver`] for those.
///
/// [`ChunkedObjectDriver`]: crate::driver::ChunkedObjectDriver
#[derive(Debug)]
pub struct ObjectDriver<C> {
    client: C,
    kind: ObjectKind,
}

impl<C: ObjectClient> ObjectDriver<C> {
    /// Create a driver which stores releases as `kind` objects using `client`.
    pub fn new(client: C, kind: ObjectKind) -> Self {
        ObjectDriver { client, kind }
    }

    /// Return the client this driver stores releases with.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn to_object(&self, key: &str, release: &Release, labels: Labels) -> crate::Result<StoredObject> {
        let mut data = BTreeMap::new();
        data.insert(RELEASE_FIELD.to_string(), encode(release)?.into_bytes());
        Ok(StoredObject {
            name: key.to_string(),
            labels: labels.into_map(),
            data,
        })
    }

    fn from_object(object: &StoredObject) -> crate::Result<Release> {
        let payload = object.data.get(RELEASE_FIELD).ok_or_else(|| {
            crate::Error::Encoding(format!("object {:?} has no release data", object.name))
        })?;
        restore_release(object, payload)
    }

    /// Decode every object in `objects`, skipping the ones which are corrupt.
    fn decode_all(&self, objects: Vec<StoredObject>) -> Vec<Release> {
        let mut releases = Vec::with_capacity(objects.len());
        for object in objects {
            match Self::from_object(&object) {
                Ok(release) => releases.push(release),
                Err(error) => tracing::warn!(
                    driver = self.name(),
                    key = %object.name,
                    %error,
                    "skipping release which could not be decoded"
                ),
            }
        }
        releases
    }
}

impl<C: ObjectClient> Driver for ObjectDriver<C> {
    fn name(&self) -> &'static str {
        self.kind.driver_name()
    }

    fn get(&self, key: &str) -> crate::Result<Release> {
        let object = self
            .client
            .get(key)
            .map_err(|error| client_error("get", key, error))?
            .ok_or(crate::Error::NotFound)?;
        if object.labels.get(OWNER_LABEL).map(String::as_str) != Some(OWNER) {
            return Err(crate::Error::NotFound);
        }
        Self::from_object(&object)
    }

    fn list(&self, filter: Filter<'_>) -> crate::Result<Vec<Release>> {
        let mut selector = BTreeMap::new();
        selector.insert(OWNER_LABEL.to_string(), OWNER.to_string());
        let objects = self
            .client
            .list(&selector)
            .map_err(|error| crate::Error::backend("list", "", error))?;

        let mut releases = self.decode_all(objects);
        releases.retain(|release| filter(release));
        Ok(releases)
    }

    fn query(&self, labels: &BTreeMap<String, String>) -> crate::Result<Vec<Release>> {
        let selector = query_selector(labels)?.ok_or(crate::Error::NotFound)?;
        let objects = self
            .client
            .list(&selector)
            .map_err(|error| crate::Error::backend("query", "", error))?;

        let releases = self.decode_all(objects);
        if releases.is_empty() {
            return Err(crate::Error::NotFound);
        }
        Ok(releases)
    }

    fn create(&self, key: &str, release: &Release) -> crate::Result<()> {
        validate_labels(release)?;
        let labels = release_labels(release)
            .set(CREATED_AT_LABEL, timestamp())
            .build();
        let object = self.to_object(key, release, labels)?;
        self.client
            .create(&object)
            .map_err(|error| client_error("create", key, error))
    }

    fn update(&self, key: &str, release: &Release) -> crate::Result<()> {
        validate_labels(release)?;
        let existing = self
            .client
            .get(key)
            .map_err(|error| client_error("update", key, error))?
            .filter(|object| object.labels.get(OWNER_LABEL).map(String::as_str) == Some(OWNER))
            .ok_or(crate::Error::NotFound)?;

        let mut labels = release_labels(release).set(MODIFIED_AT_LABEL, timestamp());
        if let Some(created_at) = existing.labels.get(CREATED_AT_LABEL) {
            labels = labels.set(CREATED_AT_LABEL, created_at);
        }
        let labels = labels.build();
        let object = self.to_object(key, release, labels)?;
        self.client
            .update(&object)
            .map_err(|error| client_error("update", key, error))
    }

    fn delete(&self, key: &str) -> crate::Result<Release> {
        let release = self.get(key)?;
        self.client
            .delete(key)
            .map_err(|error| client_error("delete", key, error))?;
        Ok(release)
    }
}
