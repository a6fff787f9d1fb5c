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

//! Drivers which persistently store release revisions.
//!
//! A [`Driver`] stores the revisions of releases in a backend. Every driver implements the same
//! contract, so the [`Storage`] layer and callers can switch backends freely:
//! - `get` and `delete` fail with `Error::NotFound` when the key does not exist.
//! - `create` fails with `Error::AlreadyExists` rather than overwriting a release.
//! - `update` fails with `Error::NotFound` rather than creating a release.
//! - `list` returns an empty list when nothing matches, while `query` fails with
//! `Error::NotFound`.
//! - Objects without the ownership label are never read, listed or modified.
//!
//! The following drivers are provided:
//! - [`MemoryDriver`] stores releases in memory.
//! - [`ObjectDriver`] stores each release in one config map or secret object.
//! - [`ChunkedObjectDriver`] splits releases across as many objects as their size requires.
//! - [`SqlDriver`] stores releases in a SQLite database.
//! - [`BlobDriver`] stores releases as blobs in an object storage service, like Amazon S3 or a
//! directory in the local file system.
//!
//! Each driver has a config type which implements [`OpenDriver`].
//!
//! [`Storage`]: crate::storage::Storage

pub use self::blob_driver::{BlobConfig, BlobDriver, Fetch};
#[cfg(feature = "store-directory")]
pub use self::blob_driver::DirectoryConfig;
#[cfg(feature = "store-s3")]
pub use self::blob_driver::S3Config;
pub use self::chunked_driver::{ChunkedConfig, ChunkedObjectDriver};
#[cfg(feature = "store-redis")]
pub use self::chunked_driver::RedisConfig;
pub use self::chunking::{ChunkingConfig, CHUNK_SIZE_ENV, DEFAULT_CHUNK_SIZE, MAX_OBJECT_SIZE};
pub use self::common::{Driver, Filter, DEFAULT_NAMESPACE};
pub use self::memory_driver::{MemoryConfig, MemoryDriver};
pub use self::object_driver::{ObjectConfig, ObjectDriver, ObjectKind};
pub use self::open_driver::OpenDriver;
#[cfg(feature = "store-sqlite")]
pub use self::sql_driver::{SqlDriver, SqliteConfig};

mod blob_driver;
mod chunked_driver;
mod chunking;
mod common;
mod memory_driver;
mod object_driver;
mod open_driver;
mod records;
mod sql_driver;
