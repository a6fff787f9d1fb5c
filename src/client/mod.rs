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

//! Narrow clients for the backends drivers store releases in.
//!
//! Drivers never talk to a backend SDK directly. Each driver is written against one small client
//! trait which provides only the operations it needs, so the driver logic is independent of the
//! backend and can be tested against an in-memory client.
//!
//! - [`ObjectClient`] stores small labeled key/value objects, like Kubernetes config maps or
//! secrets. It is used by [`ObjectDriver`] and [`ChunkedObjectDriver`].
//! - [`BlobClient`] stores blobs with metadata in an object storage service. It is used by
//! [`BlobDriver`].
//!
//! [`ObjectDriver`]: crate::driver::ObjectDriver
//! [`ChunkedObjectDriver`]: crate::driver::ChunkedObjectDriver
//! [`BlobDriver`]: crate::driver::BlobDriver

use std::collections::BTreeMap;
use std::fmt::Debug;

use static_assertions::assert_obj_safe;
use thiserror::Error as DeriveError;

#[cfg(feature = "store-directory")]
pub use self::directory_blobs::DirectoryBlobs;
pub use self::memory_blobs::MemoryBlobs;
pub use self::memory_objects::MemoryObjects;
#[cfg(feature = "store-redis")]
pub use self::redis_objects::{RedisAddr, RedisObjects};
#[cfg(feature = "store-s3")]
pub use self::s3_blobs::{S3Blobs, S3Credentials, S3Region};

mod directory_blobs;
mod memory_blobs;
mod memory_objects;
mod redis_objects;
mod s3_blobs;

/// An error that occurred in a backend client.
#[derive(Debug, DeriveError)]
pub enum ClientError {
    /// The object does not exist.
    #[error("object not found")]
    NotFound,

    /// An object with the same name already exists.
    #[error("object already exists")]
    AlreadyExists,

    /// The object exceeds the size limit of the backend.
    #[error("object of {size} bytes exceeds the limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// Any other backend error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A result type for backend client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// A labeled key/value object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredObject {
    /// The name of the object, unique within the client's namespace.
    pub name: String,

    /// The labels of the object.
    pub labels: BTreeMap<String, String>,

    /// The data fields of the object.
    pub data: BTreeMap<String, Vec<u8>>,
}

impl StoredObject {
    /// Return the combined size of the data fields of this object.
    pub fn size(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }
}

/// A client for a namespace of labeled key/value objects.
pub trait ObjectClient: Debug + Send + Sync {
    /// Return the object with the given `name`, or `None` if it does not exist.
    fn get(&self, name: &str) -> ClientResult<Option<StoredObject>>;

    /// Create a new object.
    ///
    /// This returns `ClientError::AlreadyExists` if an object with the same name exists.
    fn create(&self, object: &StoredObject) -> ClientResult<()>;

    /// Replace an existing object.
    ///
    /// This returns `ClientError::NotFound` if there is no object with the same name.
    fn update(&self, object: &StoredObject) -> ClientResult<()>;

    /// Remove the object with the given `name`.
    ///
    /// This returns `ClientError::NotFound` if there is no object with the given `name`.
    fn delete(&self, name: &str) -> ClientResult<()>;

    /// Return every object whose labels include all of `selector`.
    fn list(&self, selector: &BTreeMap<String, String>) -> ClientResult<Vec<StoredObject>>;
}

assert_obj_safe!(ObjectClient);

/// A blob and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob {
    /// The user metadata of the blob.
    pub metadata: BTreeMap<String, String>,

    /// The contents of the blob.
    pub body: Vec<u8>,
}

/// A precondition for writing a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Write the blob only if there is no blob at the same path.
    IfAbsent,

    /// Write the blob, replacing any existing blob.
    Overwrite,
}

/// The result of listing the blobs under a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Listing {
    /// The paths of the blobs directly under the prefix.
    pub paths: Vec<String>,

    /// The common prefixes one level below the prefix, each ending with `/`.
    pub prefixes: Vec<String>,
}

/// A client for an object storage service.
///
/// Paths are `/`-separated.
pub trait BlobClient: Debug + Send + Sync {
    /// Return the blob at `path`, or `None` if it does not exist.
    fn get(&self, path: &str) -> ClientResult<Option<Blob>>;

    /// Return the metadata of the blob at `path`, or `None` if it does not exist.
    fn head(&self, path: &str) -> ClientResult<Option<BTreeMap<String, String>>>;

    /// Write `blob` at `path`.
    ///
    /// With `PutCondition::IfAbsent`, this returns `ClientError::AlreadyExists` if there is
    /// already a blob at `path`.
    fn put(&self, path: &str, blob: &Blob, condition: PutCondition) -> ClientResult<()>;

    /// Remove the blob at `path`.
    ///
    /// This returns `ClientError::NotFound` if there is no blob at `path`.
    fn delete(&self, path: &str) -> ClientResult<()>;

    /// List the blobs and common prefixes directly under `prefix`.
    ///
    /// `prefix` is either empty or ends with `/`.
    fn list(&self, prefix: &str) -> ClientResult<Listing>;
}

assert_obj_safe!(BlobClient);
