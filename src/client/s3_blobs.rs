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

#![cfg(feature = "store-s3")]

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::anyhow;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;

use super::memory_blobs::list_level;
use super::{Blob, BlobClient, ClientError, ClientResult, Listing, PutCondition};

/// The MIME content type to use for release payloads.
const CONTENT_TYPE: &str = "application/octet-stream";

/// The prefix of headers which carry user metadata.
const METADATA_HEADER_PREFIX: &str = "x-amz-meta-";

// HTTP status codes.
const NOT_FOUND_CODE: u16 = 404;
const PRECONDITION_FAILED_CODE: u16 = 412;

fn s3_error(error: impl Into<anyhow::Error>) -> ClientError {
    ClientError::Other(error.into())
}

fn status_error(operation: &str, path: &str, code: u16) -> ClientError {
    ClientError::Other(anyhow!(
        "S3 {} of {:?} failed with status {}.",
        operation,
        path,
        code
    ))
}

/// An S3 region.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(docsrs, doc(cfg(feature = "store-s3")))]
pub struct S3Region {
    /// The name of the region.
    pub name: String,

    /// The endpoint to connect to, for S3-compatible services outside of AWS.
    pub endpoint: Option<String>,
}

impl S3Region {
    /// Return the AWS region with the given `name`.
    pub fn from_name(name: &str) -> Self {
        S3Region {
            name: name.to_string(),
            endpoint: None,
        }
    }

    fn to_region(&self) -> anyhow::Result<Region> {
        Ok(match &self.endpoint {
            Some(endpoint) => Region::Custom {
                region: self.name.clone(),
                endpoint: endpoint.clone(),
            },
            None => Region::from_str(&self.name)?,
        })
    }
}

/// Credentials for connecting to S3.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(docsrs, doc(cfg(feature = "store-s3")))]
pub enum S3Credentials {
    /// An access key and a secret key.
    Basic {
        access_key: String,
        secret_key: String,
    },

    /// Credentials from the environment or the default profile.
    Default,
}

impl S3Credentials {
    fn to_credentials(&self) -> anyhow::Result<Credentials> {
        Ok(match self {
            S3Credentials::Basic {
                access_key,
                secret_key,
            } => Credentials::new(
                Some(access_key.as_str()),
                Some(secret_key.as_str()),
                None,
                None,
                None,
            )?,
            S3Credentials::Default => Credentials::default()?,
        })
    }
}

/// A `BlobClient` which stores blobs in an Amazon S3 bucket.
///
/// Metadata is sent as `x-amz-meta-*` headers. Conditional creates use `If-None-Match: *`, which
/// the service rejects with `412 Precondition Failed` when the object exists.
#[derive(Debug)]
#[cfg_attr(docsrs, doc(cfg(feature = "store-s3")))]
pub struct S3Blobs {
    bucket: Bucket,
}

impl S3Blobs {
    /// Connect to the bucket with the given `name`.
    ///
    /// Path-style addressing is used when `region` has a custom endpoint.
    pub fn connect(
        name: &str,
        region: &S3Region,
        credentials: &S3Credentials,
    ) -> anyhow::Result<Self> {
        let bucket = Bucket::new(name, region.to_region()?, credentials.to_credentials()?)?;
        let bucket = if region.endpoint.is_some() {
            bucket.with_path_style()
        } else {
            bucket
        };
        Ok(S3Blobs { bucket })
    }
}

impl BlobClient for S3Blobs {
    fn get(&self, path: &str) -> ClientResult<Option<Blob>> {
        let response = self.bucket.get_object(path).map_err(s3_error)?;
        match response.status_code() {
            NOT_FOUND_CODE => Ok(None),
            200..=299 => {
                let metadata = response
                    .headers()
                    .into_iter()
                    .filter_map(|(name, value)| {
                        name.to_lowercase()
                            .strip_prefix(METADATA_HEADER_PREFIX)
                            .map(|key| (key.to_string(), value))
                    })
                    .collect();
                Ok(Some(Blob {
                    metadata,
                    body: response.bytes().to_vec(),
                }))
            }
            code => Err(status_error("get", path, code)),
        }
    }

    fn head(&self, path: &str) -> ClientResult<Option<BTreeMap<String, String>>> {
        let (result, code) = self.bucket.head_object(path).map_err(s3_error)?;
        match code {
            NOT_FOUND_CODE => Ok(None),
            200..=299 => Ok(Some(
                result
                    .metadata
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(key, value)| (key.to_lowercase(), value))
                    .collect(),
            )),
            code => Err(status_error("head", path, code)),
        }
    }

    fn put(&self, path: &str, blob: &Blob, condition: PutCondition) -> ClientResult<()> {
        let mut bucket = self.bucket.clone();
        for (key, value) in &blob.metadata {
            bucket.add_header(&format!("{}{}", METADATA_HEADER_PREFIX, key), value);
        }
        if condition == PutCondition::IfAbsent {
            bucket.add_header("If-None-Match", "*");
        }

        let response = bucket
            .put_object_with_content_type(path, &blob.body, CONTENT_TYPE)
            .map_err(s3_error)?;
        match response.status_code() {
            200..=299 => Ok(()),
            PRECONDITION_FAILED_CODE => Err(ClientError::AlreadyExists),
            code => Err(status_error("put", path, code)),
        }
    }

    fn delete(&self, path: &str) -> ClientResult<()> {
        // Deleting a missing object succeeds in S3, so check that it exists first.
        if self.head(path)?.is_none() {
            return Err(ClientError::NotFound);
        }
        let response = self.bucket.delete_object(path).map_err(s3_error)?;
        match response.status_code() {
            200..=299 => Ok(()),
            NOT_FOUND_CODE => Err(ClientError::NotFound),
            code => Err(status_error("delete", path, code)),
        }
    }

    fn list(&self, prefix: &str) -> ClientResult<Listing> {
        let results = self
            .bucket
            .list(prefix.to_string(), Some(String::from("/")))
            .map_err(s3_error)?;

        let mut listing = Listing::default();
        for result in results {
            listing
                .paths
                .extend(result.contents.into_iter().map(|object| object.key));
            listing.prefixes.extend(
                result
                    .common_prefixes
                    .unwrap_or_default()
                    .into_iter()
                    .map(|common| common.prefix),
            );
        }

        // Services which ignore the delimiter return nested keys, so group them here.
        let keys = listing
            .paths
            .iter()
            .chain(listing.prefixes.iter())
            .map(String::as_str);
        Ok(list_level(prefix, keys))
    }
}
