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

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::client::{Blob, BlobClient, ClientError, PutCondition};
use crate::labels::{
    self, CREATED_AT_LABEL, MODIFIED_AT_LABEL, NAME_LABEL, OWNER, OWNER_LABEL, STATUS_LABEL,
    VERSION_LABEL,
};
use crate::release::{decode, encode, Release, Status};

use super::common::{timestamp, Driver, Filter, DEFAULT_NAMESPACE};
use super::open_driver::OpenDriver;

// Metadata keys. Object storage services lowercase metadata keys, so every key is lowercase.
const NAME_KEY: &str = "name";
const NAMESPACE_KEY: &str = "namespace";
const STATUS_KEY: &str = "status";
const VERSION_KEY: &str = "version";
const OWNER_KEY: &str = "owner";
const CREATED_AT_KEY: &str = "createdat";
const MODIFIED_AT_KEY: &str = "modifiedat";
const LABELS_KEY: &str = "labels";

/// The metadata keys which hold system labels.
const LABEL_KEYS: [(&str, &str); 6] = [
    (NAME_LABEL, NAME_KEY),
    (OWNER_LABEL, OWNER_KEY),
    (STATUS_LABEL, STATUS_KEY),
    (VERSION_LABEL, VERSION_KEY),
    (CREATED_AT_LABEL, CREATED_AT_KEY),
    (MODIFIED_AT_LABEL, MODIFIED_AT_KEY),
];

/// How much of each release a listing fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// Only fetch metadata.
    ///
    /// Returned releases only have their name, namespace, version, status and custom labels set.
    Metadata,

    /// Fetch and decode the whole release.
    Body,
}

/// Encode custom labels so they fit in a metadata value.
fn encode_labels(labels: &BTreeMap<String, String>) -> crate::Result<String> {
    let json =
        serde_json::to_vec(labels).map_err(|error| crate::Error::Encoding(error.to_string()))?;
    Ok(STANDARD.encode(json))
}

fn decode_labels(metadata: &BTreeMap<String, String>) -> crate::Result<BTreeMap<String, String>> {
    let encoded = match metadata.get(LABELS_KEY) {
        Some(encoded) if !encoded.is_empty() => encoded,
        _ => return Ok(BTreeMap::new()),
    };
    let json = STANDARD
        .decode(encoded)
        .map_err(|error| crate::Error::Encoding(format!("invalid labels: {}", error)))?;
    serde_json::from_slice(&json)
        .map_err(|error| crate::Error::Encoding(format!("invalid labels: {}", error)))
}

/// Return the labels of a blob, as a caller would query them.
fn metadata_labels(metadata: &BTreeMap<String, String>) -> crate::Result<BTreeMap<String, String>> {
    let mut labels = decode_labels(metadata)?;
    for (label, key) in LABEL_KEYS {
        if let Some(value) = metadata.get(key) {
            labels.insert(label.to_string(), value.clone());
        }
    }
    Ok(labels)
}

fn is_owned(metadata: &BTreeMap<String, String>) -> bool {
    metadata.get(OWNER_KEY).map(String::as_str) == Some(OWNER)
}

/// Build a release with only the fields stored in `metadata`.
fn release_stub(metadata: &BTreeMap<String, String>) -> crate::Result<Release> {
    let field = |key: &str| {
        metadata.get(key).cloned().ok_or_else(|| {
            crate::Error::Encoding(format!("blob metadata has no {:?} entry", key))
        })
    };
    let version: u32 = field(VERSION_KEY)?
        .parse()
        .map_err(|_| crate::Error::Encoding(String::from("blob metadata has an invalid version")))?;
    let status: Status = field(STATUS_KEY)?
        .parse()
        .map_err(|_| crate::Error::Encoding(String::from("blob metadata has an invalid status")))?;

    let mut release = Release {
        name: field(NAME_KEY)?,
        namespace: field(NAMESPACE_KEY)?,
        version,
        labels: decode_labels(metadata)?,
        ..Release::default()
    };
    release.info.status = status;
    Ok(release)
}

/// Return the namespace a release is written to.
fn release_namespace(release: &Release) -> &str {
    if release.namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        &release.namespace
    }
}

fn client_error(operation: &'static str, path: &str, error: ClientError) -> crate::Error {
    match error {
        ClientError::NotFound => crate::Error::NotFound,
        ClientError::AlreadyExists => crate::Error::AlreadyExists,
        error => crate::Error::backend(operation, path, error),
    }
}

/// The configuration for opening a [`BlobDriver`] on any [`BlobClient`].
#[derive(Debug, Clone)]
pub struct BlobConfig<C> {
    /// The client for the bucket to store releases in.
    pub client: C,

    /// The path prefix under which releases are stored.
    pub prefix: String,

    /// The namespace to read releases from and to restrict listings to.
    pub namespace: Option<String>,
}

impl<C: BlobClient + Clone + 'static> OpenDriver for BlobConfig<C> {
    type Driver = BlobDriver<C>;

    fn open(&self) -> crate::Result<Self::Driver> {
        Ok(BlobDriver::new(
            self.client.clone(),
            &self.prefix,
            self.namespace.clone(),
        ))
    }
}

/// A `Driver` which stores each release as a blob in an object storage service.
///
/// A release is stored at `<prefix>/<namespace>/<key>`. Its body is the encoded release, and its
/// metadata holds the system labels and the custom labels, so listings can select releases
/// without downloading them.
///
/// Creates are atomic when the client supports conditional writes. Updates check that the release
/// exists and then overwrite it, so a concurrent delete between the two steps can be undone.
#[derive(Debug)]
pub struct BlobDriver<C> {
    client: C,
    prefix: String,
    namespace: Option<String>,
}

impl<C: BlobClient> BlobDriver<C> {
    /// Create a driver which stores releases under `prefix` using `client`.
    ///
    /// If `namespace` is `None`, reads use the `default` namespace and listings span every
    /// namespace.
    pub fn new(client: C, prefix: &str, namespace: Option<String>) -> Self {
        BlobDriver {
            client,
            prefix: prefix.trim_matches('/').to_string(),
            namespace: namespace.filter(|namespace| !namespace.is_empty()),
        }
    }

    /// Return the client this driver stores releases with.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The path prefix of every namespace.
    fn root(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    fn namespace_prefix(&self, namespace: &str) -> String {
        format!("{}{}/", self.root(), namespace)
    }

    fn path(&self, namespace: &str, key: &str) -> String {
        format!("{}{}", self.namespace_prefix(namespace), key)
    }

    /// The namespace single-release operations act on.
    fn read_namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Return the path prefixes of every namespace visible to listings.
    fn namespace_prefixes(&self, operation: &'static str) -> crate::Result<Vec<String>> {
        match &self.namespace {
            Some(namespace) => Ok(vec![self.namespace_prefix(namespace)]),
            None => {
                let root = self.root();
                let listing = self
                    .client
                    .list(&root)
                    .map_err(|error| crate::Error::backend(operation, root.as_str(), error))?;
                Ok(listing.prefixes)
            }
        }
    }

    /// Return the paths of every blob visible to listings.
    fn blob_paths(&self, operation: &'static str) -> crate::Result<Vec<String>> {
        let mut paths = Vec::new();
        for prefix in self.namespace_prefixes(operation)? {
            let listing = self
                .client
                .list(&prefix)
                .map_err(|error| crate::Error::backend(operation, prefix.as_str(), error))?;
            paths.extend(listing.paths);
        }
        Ok(paths)
    }

    fn metadata(
        &self,
        release: &Release,
        timestamp_key: &str,
        time: String,
    ) -> crate::Result<BTreeMap<String, String>> {
        let mut metadata = BTreeMap::new();
        metadata.insert(NAME_KEY.to_string(), release.name.clone());
        metadata.insert(
            NAMESPACE_KEY.to_string(),
            release_namespace(release).to_string(),
        );
        metadata.insert(STATUS_KEY.to_string(), release.info.status.to_string());
        metadata.insert(VERSION_KEY.to_string(), release.version.to_string());
        metadata.insert(OWNER_KEY.to_string(), OWNER.to_string());
        metadata.insert(timestamp_key.to_string(), time);
        metadata.insert(LABELS_KEY.to_string(), encode_labels(&release.labels)?);
        Ok(metadata)
    }

    /// Fetch the release at `path` whose metadata is `metadata`.
    fn fetch(
        &self,
        operation: &'static str,
        path: &str,
        metadata: &BTreeMap<String, String>,
        fetch: Fetch,
    ) -> crate::Result<Option<Release>> {
        match fetch {
            Fetch::Metadata => release_stub(metadata).map(Some),
            Fetch::Body => match self
                .client
                .get(path)
                .map_err(|error| crate::Error::backend(operation, path, error))?
            {
                Some(blob) => {
                    let mut release = decode(&blob.body)?;
                    release.labels = decode_labels(&blob.metadata)?;
                    Ok(Some(release))
                }
                // Deleted since it was listed.
                None => Ok(None),
            },
        }
    }

    /// Call `visit` with the path and metadata of every owned blob visible to listings.
    fn for_each_blob(
        &self,
        operation: &'static str,
        mut visit: impl FnMut(&str, &BTreeMap<String, String>) -> crate::Result<()>,
    ) -> crate::Result<()> {
        for path in self.blob_paths(operation)? {
            let metadata = match self
                .client
                .head(&path)
                .map_err(|error| crate::Error::backend(operation, path.as_str(), error))?
            {
                Some(metadata) if is_owned(&metadata) => metadata,
                _ => continue,
            };
            visit(&path, &metadata)?;
        }
        Ok(())
    }

    /// Push the release at `path` onto `releases` if it can be read.
    fn collect(
        &self,
        operation: &'static str,
        path: &str,
        metadata: &BTreeMap<String, String>,
        fetch: Fetch,
        filter: Filter<'_>,
        releases: &mut Vec<Release>,
    ) -> crate::Result<()> {
        match self.fetch(operation, path, metadata, fetch) {
            Ok(Some(release)) => {
                if filter(&release) {
                    releases.push(release);
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(error @ crate::Error::Backend { .. }) => Err(error),
            Err(error) => {
                tracing::warn!(
                    driver = self.name(),
                    %path,
                    %error,
                    "skipping release which could not be decoded"
                );
                Ok(())
            }
        }
    }

    /// Return every release for which `filter` returns `true`, fetching as much as `fetch` says.
    ///
    /// With `Fetch::Metadata`, `filter` sees the partial releases.
    ///
    /// # Errors
    /// - `Error::Backend`: An error occurred in the backend.
    pub fn list_releases(&self, filter: Filter<'_>, fetch: Fetch) -> crate::Result<Vec<Release>> {
        let mut releases = Vec::new();
        self.for_each_blob("list", |path, metadata| {
            self.collect("list", path, metadata, fetch, filter, &mut releases)
        })?;
        Ok(releases)
    }

    /// Return every release whose labels include all of `labels`, fetching as much as `fetch`
    /// says.
    ///
    /// Both system labels and custom labels can be queried.
    ///
    /// # Errors
    /// - `Error::NotFound`: No release matches the given `labels`.
    /// - `Error::Validation`: A value in `labels` is not a valid label value.
    /// - `Error::Backend`: An error occurred in the backend.
    pub fn query_releases(
        &self,
        labels: &BTreeMap<String, String>,
        fetch: Fetch,
    ) -> crate::Result<Vec<Release>> {
        for (key, value) in labels {
            if !labels::is_valid_label_value(value) {
                return Err(crate::Error::Validation(format!(
                    "invalid value {:?} for label {:?}",
                    value, key
                )));
            }
        }

        let mut releases = Vec::new();
        self.for_each_blob("query", |path, metadata| {
            let matches = match metadata_labels(metadata) {
                Ok(blob_labels) => labels
                    .iter()
                    .all(|(key, value)| blob_labels.get(key) == Some(value)),
                Err(error) => {
                    tracing::warn!(%path, %error, "skipping blob with invalid labels");
                    false
                }
            };
            if matches {
                self.collect("query", path, metadata, fetch, &|_| true, &mut releases)?;
            }
            Ok(())
        })?;

        if releases.is_empty() {
            return Err(crate::Error::NotFound);
        }
        Ok(releases)
    }
}

impl<C: BlobClient> Driver for BlobDriver<C> {
    fn name(&self) -> &'static str {
        "Blob"
    }

    fn get(&self, key: &str) -> crate::Result<Release> {
        let path = self.path(self.read_namespace(), key);
        let blob = self
            .client
            .get(&path)
            .map_err(|error| client_error("get", &path, error))?
            .filter(|blob| is_owned(&blob.metadata))
            .ok_or(crate::Error::NotFound)?;
        let mut release = decode(&blob.body)?;
        release.labels = decode_labels(&blob.metadata)?;
        Ok(release)
    }

    fn list(&self, filter: Filter<'_>) -> crate::Result<Vec<Release>> {
        self.list_releases(filter, Fetch::Body)
    }

    fn query(&self, labels: &BTreeMap<String, String>) -> crate::Result<Vec<Release>> {
        self.query_releases(labels, Fetch::Body)
    }

    fn create(&self, key: &str, release: &Release) -> crate::Result<()> {
        labels::validate_custom_labels(&release.labels)?;
        let path = self.path(release_namespace(release), key);
        let blob = Blob {
            metadata: self.metadata(release, CREATED_AT_KEY, timestamp().to_string())?,
            body: encode(release)?.into_bytes(),
        };
        self.client
            .put(&path, &blob, PutCondition::IfAbsent)
            .map_err(|error| client_error("create", &path, error))
    }

    fn update(&self, key: &str, release: &Release) -> crate::Result<()> {
        labels::validate_custom_labels(&release.labels)?;
        let path = self.path(release_namespace(release), key);
        let existing = self
            .client
            .head(&path)
            .map_err(|error| client_error("update", &path, error))?
            .filter(is_owned)
            .ok_or(crate::Error::NotFound)?;

        let mut metadata = self.metadata(release, MODIFIED_AT_KEY, timestamp().to_string())?;
        if let Some(created_at) = existing.get(CREATED_AT_KEY) {
            metadata.insert(CREATED_AT_KEY.to_string(), created_at.clone());
        }
        let blob = Blob {
            metadata,
            body: encode(release)?.into_bytes(),
        };
        self.client
            .put(&path, &blob, PutCondition::Overwrite)
            .map_err(|error| client_error("update", &path, error))
    }

    fn delete(&self, key: &str) -> crate::Result<Release> {
        let release = self.get(key)?;
        let path = self.path(self.read_namespace(), key);
        self.client
            .delete(&path)
            .map_err(|error| client_error("delete", &path, error))?;
        Ok(release)
    }
}

#[cfg(feature = "store-s3")]
pub use self::s3_config::S3Config;

#[cfg(feature = "store-s3")]
mod s3_config {
    use super::*;
    use crate::client::{S3Blobs, S3Credentials, S3Region};

    /// The configuration for opening a [`BlobDriver`] on an Amazon S3 bucket.
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[cfg_attr(docsrs, doc(cfg(feature = "store-s3")))]
    pub struct S3Config {
        /// The name of the bucket.
        pub bucket: String,

        /// The region of the bucket.
        pub region: S3Region,

        /// The credentials to connect with.
        pub credentials: S3Credentials,

        /// The path prefix under which releases are stored.
        pub prefix: String,

        /// The namespace to read releases from and to restrict listings to.
        pub namespace: Option<String>,
    }

    impl OpenDriver for S3Config {
        type Driver = BlobDriver<S3Blobs>;

        fn open(&self) -> crate::Result<Self::Driver> {
            let client = S3Blobs::connect(&self.bucket, &self.region, &self.credentials)
                .map_err(|error| crate::Error::backend("open", self.bucket.as_str(), error))?;
            Ok(BlobDriver::new(client, &self.prefix, self.namespace.clone()))
        }
    }
}

#[cfg(feature = "store-directory")]
pub use self::directory_config::DirectoryConfig;

#[cfg(feature = "store-directory")]
mod directory_config {
    use std::path::PathBuf;

    use super::*;
    use crate::client::DirectoryBlobs;

    /// The configuration for opening a [`BlobDriver`] on a directory in the local file system.
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[cfg_attr(docsrs, doc(cfg(feature = "store-directory")))]
    pub struct DirectoryConfig {
        /// The path of the directory, which is created if it does not exist.
        pub path: PathBuf,

        /// The namespace to read releases from and to restrict listings to.
        pub namespace: Option<String>,
    }

    impl OpenDriver for DirectoryConfig {
        type Driver = BlobDriver<DirectoryBlobs>;

        fn open(&self) -> crate::Result<Self::Driver> {
            let client = DirectoryBlobs::open(&self.path).map_err(|error| {
                crate::Error::backend("open", self.path.to_string_lossy(), error)
            })?;
            Ok(BlobDriver::new(client, "", self.namespace.clone()))
        }
    }
}
