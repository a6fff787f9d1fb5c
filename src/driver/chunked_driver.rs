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
    Labels, LabelsBuilder, CREATED_AT_LABEL, MODIFIED_AT_LABEL, OWNER, OWNER_LABEL,
};
use crate::release::{encode, Release};

use super::chunking::{
    continuation_key, split, ChunkingConfig, CHUNKS_LABEL, CHUNK_LABEL, CHUNK_SIZE_LABEL,
};
use super::common::{timestamp, Driver, Filter};
use super::object_driver::{
    client_error, query_selector, release_labels, restore_release, validate_labels, ObjectKind,
    RELEASE_FIELD,
};
use super::open_driver::OpenDriver;

/// The configuration for opening a [`ChunkedObjectDriver`].
#[derive(Debug, Clone)]
pub struct ChunkedConfig<C> {
    /// The client for the namespace to store releases in.
    pub client: C,

    /// The kind of object to store releases in.
    pub kind: ObjectKind,

    /// How releases are split into objects.
    pub chunking: ChunkingConfig,
}

impl<C: ObjectClient + Clone + 'static> OpenDriver for ChunkedConfig<C> {
    type Driver = ChunkedObjectDriver<C>;

    fn open(&self) -> crate::Result<Self::Driver> {
        ChunkedObjectDriver::new(self.client.clone(), self.kind, self.chunking)
    }
}

/// A `Driver` which splits each release across as many objects as its size requires.
///
/// The encoded release is split into chunks of at most `chunk_size` bytes. The first chunk is
/// stored in the primary object, named by the release key, which carries every label of the
/// release plus the `chunk`, `chunks` and `chunksize` labels. Each following chunk `i` is stored
/// in a continuation object named `<key>.<i>`, labeled only with the ownership label and its
/// position.
///
/// The primary object decides which writer wins a concurrent create. A release is only readable
/// when every one of its chunks is present and consistent; a missing or mismatched continuation
/// is reported as `Error::Encoding` rather than returning a truncated release.
///
/// An update keeps the chunk size the release was created with, even if this driver is configured
/// with a different one.
///
/// A delete removes whatever is left of a release even when it can no longer be assembled, and
/// then reports why it could not be returned.
///
/// Continuation names are only ever written or removed when no object has the name or the object
/// there carries the ownership label.
#[derive(Debug)]
pub struct ChunkedObjectDriver<C> {
    client: C,
    kind: ObjectKind,
    chunking: ChunkingConfig,
}

/// Parse a numeric chunk label of `object`.
fn chunk_label(object: &StoredObject, label: &str) -> crate::Result<Option<usize>> {
    match object.labels.get(label) {
        Some(value) => value.parse().map(Some).map_err(|_| {
            crate::Error::Encoding(format!(
                "object {:?} has an invalid {} label {:?}",
                object.name, label, value
            ))
        }),
        None => Ok(None),
    }
}

/// Return whether `object` carries the ownership label.
fn is_owned(object: &StoredObject) -> bool {
    object.labels.get(OWNER_LABEL).map(String::as_str) == Some(OWNER)
}

/// Return whether `object` is a continuation rather than a primary object.
fn is_continuation(object: &StoredObject) -> bool {
    matches!(chunk_label(object, CHUNK_LABEL), Ok(Some(index)) if index > 1)
}

fn release_data(object: &StoredObject) -> crate::Result<&[u8]> {
    object
        .data
        .get(RELEASE_FIELD)
        .map(Vec::as_slice)
        .ok_or_else(|| {
            crate::Error::Encoding(format!("object {:?} has no release data", object.name))
        })
}

fn object_data(chunk: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut data = BTreeMap::new();
    data.insert(RELEASE_FIELD.to_string(), chunk.to_vec());
    data
}

impl<C: ObjectClient> ChunkedObjectDriver<C> {
    /// Create a driver which stores releases as `kind` objects using `client`.
    ///
    /// # Errors
    /// - `Error::Validation`: The chunk size in `chunking` is invalid.
    pub fn new(client: C, kind: ObjectKind, chunking: ChunkingConfig) -> crate::Result<Self> {
        chunking.validate()?;
        Ok(ChunkedObjectDriver {
            client,
            kind,
            chunking,
        })
    }

    /// Return the client this driver stores releases with.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Return the continuation object holding chunk `index` of `count`.
    fn continuation(&self, key: &str, index: usize, count: usize, chunk: &[u8]) -> StoredObject {
        StoredObject {
            name: continuation_key(key, index),
            labels: Labels::builder()
                .set(OWNER_LABEL, OWNER)
                .set(CHUNK_LABEL, index)
                .set(CHUNKS_LABEL, count)
                .build()
                .into_map(),
            data: object_data(chunk),
        }
    }

    /// Return the primary object for `release`, which holds the first chunk.
    fn primary(
        &self,
        key: &str,
        labels: LabelsBuilder,
        count: usize,
        chunk_size: usize,
        chunk: &[u8],
    ) -> StoredObject {
        StoredObject {
            name: key.to_string(),
            labels: labels
                .set(CHUNK_LABEL, 1)
                .set(CHUNKS_LABEL, count)
                .set(CHUNK_SIZE_LABEL, chunk_size)
                .build()
                .into_map(),
            data: object_data(chunk),
        }
    }

    /// Fetch the continuations of `primary` and decode the whole release.
    fn assemble(&self, primary: &StoredObject) -> crate::Result<Release> {
        let count = chunk_label(primary, CHUNKS_LABEL)?.unwrap_or(1);
        let mut payload = release_data(primary)?.to_vec();

        for index in 2..=count {
            let name = continuation_key(&primary.name, index);
            let continuation = self
                .client
                .get(&name)
                .map_err(|error| client_error("get", &name, error))?
                .ok_or_else(|| {
                    crate::Error::Encoding(format!(
                        "chunk {} of {} of release {:?} is missing",
                        index, count, primary.name
                    ))
                })?;
            if chunk_label(&continuation, CHUNK_LABEL)? != Some(index)
                || chunk_label(&continuation, CHUNKS_LABEL)? != Some(count)
            {
                return Err(crate::Error::Encoding(format!(
                    "chunk {} of {} of release {:?} does not belong to it",
                    index, count, primary.name
                )));
            }
            payload.extend_from_slice(release_data(&continuation)?);
        }

        restore_release(primary, &payload)
    }

    /// Assemble every primary object in `objects`, skipping the ones which are corrupt.
    fn assemble_all(&self, objects: Vec<StoredObject>) -> crate::Result<Vec<Release>> {
        let mut releases = Vec::new();
        for object in objects.iter().filter(|object| !is_continuation(object)) {
            match self.assemble(object) {
                Ok(release) => releases.push(release),
                Err(error @ crate::Error::Backend { .. }) => return Err(error),
                Err(error) => tracing::warn!(
                    driver = self.name(),
                    key = %object.name,
                    %error,
                    "skipping release which could not be decoded"
                ),
            }
        }
        Ok(releases)
    }

    /// Remove the continuations `first..=last` of the release at `key`.
    ///
    /// Continuations which are already gone are ignored, and objects of another owner which
    /// happen to have a continuation name are left alone.
    fn remove_continuations(
        &self,
        operation: &'static str,
        key: &str,
        first: usize,
        last: usize,
    ) -> crate::Result<()> {
        for index in first..=last {
            let name = continuation_key(key, index);
            match self
                .client
                .get(&name)
                .map_err(|error| crate::Error::backend(operation, name.as_str(), error))?
            {
                None => {
                    tracing::debug!(key = %name, "continuation was already removed");
                    continue;
                }
                Some(object) if !is_owned(&object) => {
                    tracing::warn!(key = %name, "leaving object of another owner in place");
                    continue;
                }
                Some(_) => {}
            }
            match self.client.delete(&name) {
                Ok(()) | Err(ClientError::NotFound) => {}
                Err(error) => return Err(crate::Error::backend(operation, name, error)),
            }
        }
        Ok(())
    }

    /// Write `object` whether or not it already exists.
    ///
    /// An existing object is only replaced when it carries the ownership label. A leftover from
    /// an interrupted write, which no readable release refers to, is overwritten.
    fn put(&self, operation: &'static str, object: &StoredObject) -> crate::Result<()> {
        let existing = self
            .client
            .get(&object.name)
            .map_err(|error| crate::Error::backend(operation, object.name.as_str(), error))?;
        let result = match existing {
            Some(existing) if !is_owned(&existing) => {
                return Err(crate::Error::backend(
                    operation,
                    object.name.as_str(),
                    anyhow::anyhow!("object {:?} belongs to another owner", object.name),
                ));
            }
            Some(_) => match self.client.update(object) {
                Err(ClientError::NotFound) => self.client.create(object),
                result => result,
            },
            None => self.client.create(object),
        };
        result.map_err(|error| crate::Error::backend(operation, object.name.as_str(), error))
    }
}

impl<C: ObjectClient> Driver for ChunkedObjectDriver<C> {
    fn name(&self) -> &'static str {
        self.kind.driver_name()
    }

    fn get(&self, key: &str) -> crate::Result<Release> {
        let primary = self
            .client
            .get(key)
            .map_err(|error| client_error("get", key, error))?
            .ok_or(crate::Error::NotFound)?;
        if !is_owned(&primary) || is_continuation(&primary) {
            return Err(crate::Error::NotFound);
        }
        self.assemble(&primary)
    }

    fn list(&self, filter: Filter<'_>) -> crate::Result<Vec<Release>> {
        let mut selector = BTreeMap::new();
        selector.insert(OWNER_LABEL.to_string(), OWNER.to_string());
        let objects = self
            .client
            .list(&selector)
            .map_err(|error| crate::Error::backend("list", "", error))?;

        let mut releases = self.assemble_all(objects)?;
        releases.retain(|release| filter(release));
        Ok(releases)
    }

    fn query(&self, labels: &BTreeMap<String, String>) -> crate::Result<Vec<Release>> {
        let selector = query_selector(labels)?.ok_or(crate::Error::NotFound)?;
        let objects = self
            .client
            .list(&selector)
            .map_err(|error| crate::Error::backend("query", "", error))?;

        let releases = self.assemble_all(objects)?;
        if releases.is_empty() {
            return Err(crate::Error::NotFound);
        }
        Ok(releases)
    }

    fn create(&self, key: &str, release: &Release) -> crate::Result<()> {
        validate_labels(release)?;
        let chunk_size = self.chunking.chunk_size;
        let payload = encode(release)?;
        let chunks = split(payload.as_bytes(), chunk_size);
        let count = chunks.len();

        let labels = release_labels(release).set(CREATED_AT_LABEL, timestamp());
        let primary = self.primary(key, labels, count, chunk_size, chunks[0]);
        self.client
            .create(&primary)
            .map_err(|error| client_error("create", key, error))?;

        for (offset, chunk) in chunks.iter().enumerate().skip(1) {
            let index = offset + 1;
            let continuation = self.continuation(key, index, count, chunk);
            if let Err(error) = self.put("create", &continuation) {
                tracing::warn!(
                    key,
                    chunk = index,
                    chunks = count,
                    %error,
                    "rolling back partially created release"
                );
                if let Err(rollback_error) = self
                    .client
                    .delete(key)
                    .map_err(|error| client_error("create", key, error))
                    .and_then(|()| self.remove_continuations("create", key, 2, index - 1))
                {
                    tracing::warn!(key, error = %rollback_error, "rollback failed");
                }
                return Err(error);
            }
        }

        Ok(())
    }

    fn update(&self, key: &str, release: &Release) -> crate::Result<()> {
        validate_labels(release)?;
        let existing = self
            .client
            .get(key)
            .map_err(|error| client_error("update", key, error))?
            .filter(|object| is_owned(object) && !is_continuation(object))
            .ok_or(crate::Error::NotFound)?;

        let chunk_size = match chunk_label(&existing, CHUNK_SIZE_LABEL)? {
            Some(chunk_size) if chunk_size > 0 => chunk_size,
            _ => self.chunking.chunk_size,
        };
        let old_count = chunk_label(&existing, CHUNKS_LABEL)?.unwrap_or(1);

        let payload = encode(release)?;
        let chunks = split(payload.as_bytes(), chunk_size);
        let count = chunks.len();

        // Continuations are written before the primary object, which still describes the old
        // chunks until it is replaced.
        for (offset, chunk) in chunks.iter().enumerate().skip(1) {
            let index = offset + 1;
            let continuation = self.continuation(key, index, count, chunk);
            self.put("update", &continuation)?;
        }

        let mut labels = release_labels(release).set(MODIFIED_AT_LABEL, timestamp());
        if let Some(created_at) = existing.labels.get(CREATED_AT_LABEL) {
            labels = labels.set(CREATED_AT_LABEL, created_at);
        }
        let primary = self.primary(key, labels, count, chunk_size, chunks[0]);
        self.client
            .update(&primary)
            .map_err(|error| client_error("update", key, error))?;

        if old_count > count {
            self.remove_continuations("update", key, count + 1, old_count)?;
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> crate::Result<Release> {
        let primary = self
            .client
            .get(key)
            .map_err(|error| client_error("delete", key, error))?
            .filter(|object| is_owned(object) && !is_continuation(object))
            .ok_or(crate::Error::NotFound)?;
        let result = match self.assemble(&primary) {
            Err(error @ crate::Error::Backend { .. }) => return Err(error),
            Err(error) => {
                tracing::warn!(
                    driver = self.name(),
                    key,
                    %error,
                    "deleting release which could not be decoded"
                );
                Err(error)
            }
            release => release,
        };
        let count = match chunk_label(&primary, CHUNKS_LABEL) {
            Ok(Some(count)) => count,
            _ => 1,
        };

        self.client
            .delete(key)
            .map_err(|error| client_error("delete", key, error))?;
        self.remove_continuations("delete", key, 2, count)?;
        result
    }
}

#[cfg(feature = "store-redis")]
pub use self::redis_config::RedisConfig;

#[cfg(feature = "store-redis")]
mod redis_config {
    use super::*;
    use crate::client::RedisObjects;
    use crate::driver::chunking::MAX_OBJECT_SIZE;

    /// The configuration for opening a [`ChunkedObjectDriver`] on a Redis server.
    ///
    /// Objects larger than `MAX_OBJECT_SIZE` are rejected, like the object stores this driver is
    /// meant for.
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[cfg_attr(docsrs, doc(cfg(feature = "store-redis")))]
    pub struct RedisConfig {
        /// The URL of the server.
        ///
        /// For a TCP connection, the format is:
        /// `redis://[<username>][:<passwd>@]<hostname>[:port][/<db>]`.
        pub url: String,

        /// The prefix of the key of every object, which acts as its namespace.
        pub prefix: String,

        /// The kind of object to store releases in.
        pub kind: ObjectKind,

        /// How releases are split into objects.
        pub chunking: ChunkingConfig,
    }

    impl OpenDriver for RedisConfig {
        type Driver = ChunkedObjectDriver<RedisObjects>;

        fn open(&self) -> crate::Result<Self::Driver> {
            let client = RedisObjects::from_url(&self.url, &self.prefix, Some(MAX_OBJECT_SIZE))
                .map_err(|error| crate::Error::backend("open", self.url.as_str(), error))?;
            ChunkedObjectDriver::new(client, self.kind, self.chunking)
        }
    }
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;
    use rand::distributions::Alphanumeric;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::client::{ClientResult, MemoryObjects};
    use crate::release::Status;

    /// An `ObjectClient` which refuses to create one object.
    #[derive(Debug)]
    struct FailingObjects {
        inner: MemoryObjects,
        fail_on: String,
    }

    impl ObjectClient for FailingObjects {
        fn get(&self, name: &str) -> ClientResult<Option<StoredObject>> {
            self.inner.get(name)
        }

        fn create(&self, object: &StoredObject) -> ClientResult<()> {
            if object.name == self.fail_on {
                return Err(ClientError::Other(anyhow::anyhow!("injected failure")));
            }
            self.inner.create(object)
        }

        fn update(&self, object: &StoredObject) -> ClientResult<()> {
            self.inner.update(object)
        }

        fn delete(&self, name: &str) -> ClientResult<()> {
            self.inner.delete(name)
        }

        fn list(&self, selector: &BTreeMap<String, String>) -> ClientResult<Vec<StoredObject>> {
            self.inner.list(selector)
        }
    }

    fn release(manifest_len: usize) -> Release {
        let mut release = Release {
            name: "wordpress".into(),
            version: 1,
            namespace: "default".into(),
            manifest: SmallRng::from_entropy()
                .sample_iter(&Alphanumeric)
                .take(manifest_len)
                .map(char::from)
                .collect(),
            ..Release::default()
        };
        release.info.status = Status::Deployed;
        release
    }

    fn driver<C: ObjectClient>(client: C, chunk_size: usize) -> ChunkedObjectDriver<C> {
        ChunkedObjectDriver::new(
            client,
            ObjectKind::Secret,
            ChunkingConfig::new(chunk_size).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn small_release_uses_one_object() {
        let client = MemoryObjects::new();
        let driver = driver(client.clone(), 1024);
        let rls = release(10);
        driver.create("wordpress.v1", &rls).unwrap();

        assert_eq!(client.names(), vec!["wordpress.v1".to_string()]);
        let primary = client.get("wordpress.v1").unwrap().unwrap();
        assert_eq!(primary.labels.get("chunk").unwrap(), "1");
        assert_eq!(primary.labels.get("chunks").unwrap(), "1");
        assert_eq!(primary.labels.get("chunksize").unwrap(), "1024");
        assert_eq!(driver.get("wordpress.v1").unwrap(), rls);
    }

    #[test]
    fn continuations_are_owned_and_positioned() {
        let client = MemoryObjects::new();
        let driver = driver(client.clone(), 64);
        driver.create("wordpress.v1", &release(4096)).unwrap();

        let chunks = client.get("wordpress.v1").unwrap().unwrap().labels["chunks"].clone();
        assert_eq!(client.len(), chunks.parse::<usize>().unwrap());
        let continuation = client.get("wordpress.v1.2").unwrap().unwrap();
        assert_eq!(
            continuation.labels,
            btreemap! {
                "owner".to_string() => "helm".to_string(),
                "chunk".to_string() => "2".to_string(),
                "chunks".to_string() => chunks,
            }
        );
    }

    #[test]
    fn oversized_primary_is_not_left_behind() {
        let client = MemoryObjects::with_size_limit(32);
        let driver = driver(client.clone(), 64);
        assert!(matches!(
            driver.create("wordpress.v1", &release(4096)),
            Err(crate::Error::Backend { .. })
        ));
        assert!(client.is_empty());
    }

    #[test]
    fn failed_continuation_rolls_back_create() {
        let inner = MemoryObjects::new();
        let driver = driver(
            FailingObjects {
                inner: inner.clone(),
                fail_on: "wordpress.v1.3".into(),
            },
            64,
        );

        assert!(matches!(
            driver.create("wordpress.v1", &release(4096)),
            Err(crate::Error::Backend { .. })
        ));
        assert!(inner.is_empty());
        assert!(matches!(
            driver.get("wordpress.v1"),
            Err(crate::Error::NotFound)
        ));
    }

    #[test]
    fn stale_continuation_is_overwritten_on_create() {
        let client = MemoryObjects::new();
        let driver = driver(client.clone(), 64);
        client
            .create(&StoredObject {
                name: "wordpress.v1.2".into(),
                labels: btreemap! {
                    "owner".to_string() => "helm".to_string(),
                    "chunk".to_string() => "2".to_string(),
                    "chunks".to_string() => "99".to_string(),
                },
                data: object_data(b"stale"),
            })
            .unwrap();

        let rls = release(4096);
        driver.create("wordpress.v1", &rls).unwrap();
        assert_eq!(driver.get("wordpress.v1").unwrap(), rls);
    }

    fn foreign(name: &str) -> StoredObject {
        StoredObject {
            name: name.into(),
            labels: btreemap! {
                "owner".to_string() => "flux".to_string(),
            },
            data: object_data(b"foreign"),
        }
    }

    #[test]
    fn create_does_not_overwrite_foreign_continuation_name() {
        let client = MemoryObjects::new();
        let driver = driver(client.clone(), 64);
        client.create(&foreign("wordpress.v1.2")).unwrap();

        assert!(matches!(
            driver.create("wordpress.v1", &release(4096)),
            Err(crate::Error::Backend { .. })
        ));
        assert_eq!(client.names(), vec!["wordpress.v1.2".to_string()]);
        assert_eq!(client.get("wordpress.v1.2").unwrap().unwrap(), foreign("wordpress.v1.2"));
    }

    #[test]
    fn delete_leaves_foreign_continuation_name_alone() {
        let client = MemoryObjects::new();
        let driver = driver(client.clone(), 64);
        driver.create("wordpress.v1", &release(4096)).unwrap();
        client.delete("wordpress.v1.3").unwrap();
        client.create(&foreign("wordpress.v1.3")).unwrap();

        assert!(matches!(
            driver.delete("wordpress.v1"),
            Err(crate::Error::Encoding(_))
        ));
        assert_eq!(client.names(), vec!["wordpress.v1.3".to_string()]);
        assert_eq!(client.get("wordpress.v1.3").unwrap().unwrap(), foreign("wordpress.v1.3"));
    }

    #[test]
    fn update_preserves_created_at() {
        let client = MemoryObjects::new();
        let driver = driver(client.clone(), 64);
        let mut rls = release(1024);
        driver.create("wordpress.v1", &rls).unwrap();
        let created_at = client.get("wordpress.v1").unwrap().unwrap().labels["createdAt"].clone();

        rls.info.status = Status::Superseded;
        driver.update("wordpress.v1", &rls).unwrap();

        let primary = client.get("wordpress.v1").unwrap().unwrap();
        assert_eq!(primary.labels["createdAt"], created_at);
        assert!(primary.labels.contains_key("modifiedAt"));
        assert_eq!(primary.labels["status"], "superseded");
    }
}
