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

#![cfg(feature = "store-directory")]

use std::collections::BTreeMap;
use std::fs::{create_dir_all, hard_link, read_dir, remove_file, rename, File};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;

use super::{Blob, BlobClient, ClientError, ClientResult, Listing, PutCondition};

// The names of top-level directories in the blob directory.
const BLOBS_DIRECTORY: &str = "blobs";
const STAGING_DIRECTORY: &str = "stage";

/// A counter used to name staging files uniquely within this process.
static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

fn io_error(error: io::Error) -> ClientError {
    ClientError::Other(anyhow::Error::from(error))
}

/// A `BlobClient` which stores blobs as files in a directory in the local file system.
///
/// Each blob is one file holding a line of JSON metadata followed by the body. Blobs are written
/// to a staging file first and then moved into place, so readers never see a partial blob.
#[derive(Debug)]
#[cfg_attr(docsrs, doc(cfg(feature = "store-directory")))]
pub struct DirectoryBlobs {
    /// The path of the root directory.
    path: PathBuf,
}

impl DirectoryBlobs {
    /// Open or create a blob directory at `path`.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        create_dir_all(path.join(BLOBS_DIRECTORY))?;
        create_dir_all(path.join(STAGING_DIRECTORY))?;
        Ok(DirectoryBlobs { path })
    }

    /// Return the file path of the blob at `path`.
    fn blob_path(&self, path: &str) -> ClientResult<PathBuf> {
        let mut blob_path = self.path.join(BLOBS_DIRECTORY);
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(ClientError::Other(anyhow!("Invalid blob path {:?}.", path)));
            }
            blob_path.push(segment);
        }
        Ok(blob_path)
    }

    /// Return a new staging path.
    fn staging_path(&self) -> PathBuf {
        let id = STAGING_COUNTER.fetch_add(1, Ordering::SeqCst);
        self.path
            .join(STAGING_DIRECTORY)
            .join(format!("{}-{}", std::process::id(), id))
    }

    /// Write `blob` to a new staging file and return its path.
    ///
    /// The staging file is removed again if it cannot be written completely.
    fn stage(&self, blob: &Blob) -> ClientResult<PathBuf> {
        let metadata =
            serde_json::to_string(&blob.metadata).map_err(|error| ClientError::Other(error.into()))?;
        let staging_path = self.staging_path();
        let result = File::create(&staging_path).and_then(|mut file| {
            file.write_all(metadata.as_bytes())?;
            file.write_all(b"\n")?;
            file.write_all(&blob.body)?;
            file.sync_all()
        });
        match result {
            Ok(()) => Ok(staging_path),
            Err(error) => {
                remove_file(&staging_path).ok();
                Err(io_error(error))
            }
        }
    }

    fn read_metadata(reader: &mut impl BufRead) -> ClientResult<BTreeMap<String, String>> {
        let mut line = String::new();
        reader.read_line(&mut line).map_err(io_error)?;
        serde_json::from_str(line.trim_end()).map_err(|error| ClientError::Other(error.into()))
    }

    fn open_blob(&self, path: &str) -> ClientResult<Option<BufReader<File>>> {
        match File::open(self.blob_path(path)?) {
            Ok(file) => Ok(Some(BufReader::new(file))),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(io_error(error)),
        }
    }
}

impl BlobClient for DirectoryBlobs {
    fn get(&self, path: &str) -> ClientResult<Option<Blob>> {
        let mut reader = match self.open_blob(path)? {
            Some(reader) => reader,
            None => return Ok(None),
        };
        let metadata = Self::read_metadata(&mut reader)?;
        let mut body = Vec::new();
        reader.read_to_end(&mut body).map_err(io_error)?;
        Ok(Some(Blob { metadata, body }))
    }

    fn head(&self, path: &str) -> ClientResult<Option<BTreeMap<String, String>>> {
        match self.open_blob(path)? {
            Some(mut reader) => Self::read_metadata(&mut reader).map(Some),
            None => Ok(None),
        }
    }

    fn put(&self, path: &str, blob: &Blob, condition: PutCondition) -> ClientResult<()> {
        let blob_path = self.blob_path(path)?;
        if let Some(parent) = blob_path.parent() {
            create_dir_all(parent).map_err(io_error)?;
        }

        let staging_path = self.stage(blob)?;
        let result = match condition {
            PutCondition::Overwrite => rename(&staging_path, &blob_path),
            // Linking fails if the destination exists, which makes the create atomic.
            PutCondition::IfAbsent => hard_link(&staging_path, &blob_path),
        };
        match remove_file(&staging_path) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => tracing::warn!(
                path = %staging_path.display(),
                %error,
                "could not remove staging file"
            ),
        }

        match result {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                Err(ClientError::AlreadyExists)
            }
            Err(error) => Err(io_error(error)),
        }
    }

    fn delete(&self, path: &str) -> ClientResult<()> {
        match remove_file(self.blob_path(path)?) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Err(ClientError::NotFound),
            Err(error) => Err(io_error(error)),
        }
    }

    fn list(&self, prefix: &str) -> ClientResult<Listing> {
        let directory = self.blob_path(prefix)?;
        let entries = match read_dir(&directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Listing::default()),
            Err(error) => return Err(io_error(error)),
        };

        let mut listing = Listing::default();
        for entry in entries {
            let entry = entry.map_err(io_error)?;
            let file_name = entry
                .file_name()
                .into_string()
                .map_err(|_| ClientError::Other(anyhow!("Blob file name is invalid.")))?;
            if entry.file_type().map_err(io_error)?.is_dir() {
                listing.prefixes.push(format!("{}{}/", prefix, file_name));
            } else {
                listing.paths.push(format!("{}{}", prefix, file_name));
            }
        }
        listing.paths.sort();
        listing.prefixes.sort();
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;

    use super::*;

    #[test]
    fn blobs_round_trip_with_metadata() {
        let directory = tempfile::tempdir().unwrap();
        let blobs = DirectoryBlobs::open(directory.path()).unwrap();
        let blob = Blob {
            metadata: btreemap! {"owner".to_string() => "helm".to_string()},
            body: b"line one\nline two".to_vec(),
        };

        blobs
            .put("releases/default/a.v1", &blob, PutCondition::IfAbsent)
            .unwrap();
        assert_eq!(blobs.get("releases/default/a.v1").unwrap(), Some(blob.clone()));
        assert_eq!(
            blobs.head("releases/default/a.v1").unwrap(),
            Some(blob.metadata.clone())
        );
        assert!(matches!(
            blobs.put("releases/default/a.v1", &blob, PutCondition::IfAbsent),
            Err(ClientError::AlreadyExists)
        ));

        let listing = blobs.list("releases/").unwrap();
        assert_eq!(listing.prefixes, vec!["releases/default/".to_string()]);
        blobs.delete("releases/default/a.v1").unwrap();
        assert_eq!(blobs.get("releases/default/a.v1").unwrap(), None);
    }

    fn staged_files(root: &Path) -> usize {
        read_dir(root.join(STAGING_DIRECTORY)).unwrap().count()
    }

    #[test]
    fn staging_files_do_not_outlive_puts() {
        let directory = tempfile::tempdir().unwrap();
        let blobs = DirectoryBlobs::open(directory.path()).unwrap();
        let blob = Blob {
            metadata: BTreeMap::new(),
            body: b"body".to_vec(),
        };

        blobs.put("a/b", &blob, PutCondition::IfAbsent).unwrap();
        blobs.put("a/b", &blob, PutCondition::Overwrite).unwrap();
        assert!(matches!(
            blobs.put("a/b", &blob, PutCondition::IfAbsent),
            Err(ClientError::AlreadyExists)
        ));
        assert_eq!(staged_files(directory.path()), 0);

        // The destination is a directory, so moving the staged blob into place fails.
        assert!(matches!(
            blobs.put("a", &blob, PutCondition::Overwrite),
            Err(ClientError::Other(_))
        ));
        assert_eq!(staged_files(directory.path()), 0);
    }
}
