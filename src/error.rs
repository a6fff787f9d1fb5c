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

use std::result;

use thiserror::Error as DeriveError;

/// The error type for operations on release storage.
///
/// Backend-specific errors never escape a driver; they are translated into one of these variants
/// at the driver boundary.
#[derive(Debug, DeriveError)]
#[non_exhaustive]
pub enum Error {
    /// The release was not found.
    ///
    /// `Driver::query` also returns this when no release matches the given labels.
    #[error("release: not found")]
    NotFound,

    /// A release with the given key already exists.
    #[error("release: already exists")]
    AlreadyExists,

    /// A key, label key or label value was rejected.
    #[error("invalid release data: {0}")]
    Validation(String),

    /// A stored payload is corrupt, truncated or could not be decoded.
    #[error("could not decode release: {0}")]
    Encoding(String),

    /// An error occurred in the storage backend.
    #[error("{operation} {key}: {source}")]
    Backend {
        /// The driver operation which failed.
        operation: &'static str,

        /// The key the operation was acting on.
        key: String,

        /// The underlying backend error.
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    /// Wrap a backend error with the name of the failed `operation` and the `key` it acted on.
    pub(crate) fn backend(
        operation: &'static str,
        key: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Error::Backend {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }
}

/// The result type for operations on release storage.
pub type Result<T> = result::Result<T, Error>;
