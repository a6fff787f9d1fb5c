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

//! `release-store` is a library for persistently storing the revisions of package releases.
//!
//! Every revision of a release is stored under a key of the form `<name>.v<version>` in a
//! backend, through a [`Driver`]. Releases are serialized to JSON, compressed, and encoded as
//! text before they are stored. Each stored release carries a set of labels which drivers use to
//! select releases without decoding them.
//!
//! The following drivers are provided:
//! - `MemoryDriver` stores releases in memory.
//! - `ObjectDriver` stores each release in one size-limited object, like a config map or secret.
//! - `ChunkedObjectDriver` splits large releases across several size-limited objects.
//! - `SqlDriver` stores releases in a SQLite database.
//! - `BlobDriver` stores releases in an object storage service like Amazon S3, or in a directory
//! in the local file system.
//!
//! [`Storage`] builds on a driver to look up revisions by release name and to limit the number
//! of revisions kept for each release.
//!
//! # Examples
//! ```
//! use release_store::driver::MemoryDriver;
//! use release_store::release::{Release, Status};
//! use release_store::storage::{Storage, StorageConfig};
//!
//! fn main() -> release_store::Result<()> {
//!     let storage = Storage::new(MemoryDriver::new(), StorageConfig { max_history: 10 });
//!
//!     let mut release = Release {
//!         name: String::from("wordpress"),
//!         version: 1,
//!         ..Release::default()
//!     };
//!     release.info.status = Status::Deployed;
//!     storage.create(&release)?;
//!
//!     assert_eq!(storage.deployed("wordpress")?.version, 1);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Features
//! Some functionality is gated behind cargo features:
//!
//! Type | Cargo Feature
//! --- | ---
//! `SqlDriver` | `store-sqlite`
//! `RedisConfig` | `store-redis`
//! `S3Config` | `store-s3`
//! `DirectoryConfig` | `store-directory`
//!
//! To use one of these types, you must enable the corresponding feature in your `Cargo.toml`.
//!
//! # Logging
//! This crate emits diagnostics with `tracing`. It never installs a subscriber.
//!
//! [`Driver`]: crate::driver::Driver
//! [`Storage`]: crate::storage::Storage

#![cfg_attr(docsrs, feature(doc_cfg))]

pub use error::{Error, Result};

pub mod client;
pub mod driver;
mod error;
pub mod labels;
pub mod release;
pub mod storage;
