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

use std::env;

/// The default maximum size of one chunk of an encoded release, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// The largest chunk size a size-limited backend accepts, in bytes.
pub const MAX_OBJECT_SIZE: usize = 1_048_576;

/// The environment variable which overrides the default chunk size.
pub const CHUNK_SIZE_ENV: &str = "HELM_DRIVER_CHUNK_SIZE";

/// The label holding the 1-based index of a chunk.
pub const CHUNK_LABEL: &str = "chunk";

/// The label holding the number of chunks of a release.
pub const CHUNKS_LABEL: &str = "chunks";

/// The label on a primary object holding the chunk size the release was split with.
pub const CHUNK_SIZE_LABEL: &str = "chunksize";

/// The labels used to track chunks, which are never treated as custom labels.
pub const CHUNK_LABELS: [&str; 3] = [CHUNK_LABEL, CHUNKS_LABEL, CHUNK_SIZE_LABEL];

/// The configuration for splitting releases into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// The maximum size of one chunk, in bytes.
    ///
    /// This must be positive and at most `MAX_OBJECT_SIZE`. The default value is
    /// `DEFAULT_CHUNK_SIZE`.
    pub chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkingConfig {
    /// Create a config with the given `chunk_size`.
    ///
    /// # Errors
    /// - `Error::Validation`: The chunk size is zero or larger than `MAX_OBJECT_SIZE`.
    pub fn new(chunk_size: usize) -> crate::Result<Self> {
        let config = ChunkingConfig { chunk_size };
        config.validate()?;
        Ok(config)
    }

    /// Create a config from the `HELM_DRIVER_CHUNK_SIZE` environment variable.
    ///
    /// This is meant to be called once when the process starts. If the variable is unset, the
    /// default chunk size is used.
    ///
    /// # Errors
    /// - `Error::Validation`: The variable is not a valid chunk size.
    pub fn from_env() -> crate::Result<Self> {
        match env::var(CHUNK_SIZE_ENV) {
            Ok(value) => {
                let chunk_size = value.trim().parse::<usize>().map_err(|_| {
                    crate::Error::Validation(format!(
                        "{} is not a valid chunk size: {:?}",
                        CHUNK_SIZE_ENV, value
                    ))
                })?;
                Self::new(chunk_size)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    /// Check that this config is valid.
    ///
    /// # Errors
    /// - `Error::Validation`: The chunk size is zero or larger than `MAX_OBJECT_SIZE`.
    pub fn validate(&self) -> crate::Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_OBJECT_SIZE {
            return Err(crate::Error::Validation(format!(
                "chunk size must be between 1 and {} bytes, got {}",
                MAX_OBJECT_SIZE, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Return the number of chunks a payload of `len` bytes is split into.
///
/// An empty payload still occupies one chunk.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    if len == 0 {
        1
    } else {
        (len + chunk_size - 1) / chunk_size
    }
}

/// Split `payload` into consecutive slices of at most `chunk_size` bytes.
///
/// This always returns at least one slice.
pub fn split(payload: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    assert!(chunk_size > 0, "The chunk size must be positive.");
    if payload.is_empty() {
        return vec![payload];
    }
    payload.chunks(chunk_size).collect()
}

/// Concatenate `chunks` back into one payload.
pub fn reassemble<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    chunks.into_iter().flatten().copied().collect()
}

/// Return the name of the continuation object holding chunk `index` of the release at `key`.
pub fn continuation_key(key: &str, index: usize) -> String {
    format!("{}.{}", key, index)
}
