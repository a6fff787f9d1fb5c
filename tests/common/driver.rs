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
use std::fmt::{self, Debug, Formatter};
use std::ops::Deref;

use rstest::*;
use tempfile::TempDir;

use release_store::client::{MemoryBlobs, MemoryObjects};
use release_store::driver::{
    BlobConfig, ChunkedConfig, ChunkingConfig, Driver, Filter, MemoryConfig, ObjectConfig,
    ObjectKind, OpenDriver,
};
use release_store::release::Release;
#[cfg(feature = "store-directory")]
use release_store::driver::DirectoryConfig;
#[cfg(feature = "store-sqlite")]
use release_store::driver::SqliteConfig;
#[cfg(feature = "store-redis")]
use release_store::driver::RedisConfig;
#[cfg(feature = "store-s3")]
use {
    rand::distributions::Alphanumeric,
    rand::rngs::SmallRng,
    rand::{Rng, SeedableRng},
    release_store::client::{S3Credentials, S3Region},
    release_store::driver::S3Config,
};

/// The chunk size used by test chunked drivers, small enough that most releases span objects.
pub const TEST_CHUNK_SIZE: usize = 256;

/// A driver which may be tied to the lifetime of a temporary directory.
pub struct TestDriver {
    directory: Option<TempDir>,
    driver: Box<dyn Driver>,
}

impl TestDriver {
    fn new(driver: impl Driver + 'static) -> Self {
        TestDriver {
            directory: None,
            driver: Box::new(driver),
        }
    }

    fn with_directory(directory: TempDir, driver: impl Driver + 'static) -> Self {
        TestDriver {
            directory: Some(directory),
            driver: Box::new(driver),
        }
    }
}

impl Deref for TestDriver {
    type Target = dyn Driver;

    fn deref(&self) -> &Self::Target {
        self.driver.as_ref()
    }
}

impl Debug for TestDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDriver")
            .field("driver", &self.driver.name())
            .finish()
    }
}

impl Driver for TestDriver {
    fn name(&self) -> &'static str {
        self.driver.name()
    }

    fn get(&self, key: &str) -> release_store::Result<Release> {
        self.driver.get(key)
    }

    fn list(&self, filter: Filter<'_>) -> release_store::Result<Vec<Release>> {
        self.driver.list(filter)
    }

    fn query(&self, labels: &BTreeMap<String, String>) -> release_store::Result<Vec<Release>> {
        self.driver.query(labels)
    }

    fn create(&self, key: &str, release: &Release) -> release_store::Result<()> {
        self.driver.create(key, release)
    }

    fn update(&self, key: &str, release: &Release) -> release_store::Result<()> {
        self.driver.update(key, release)
    }

    fn delete(&self, key: &str) -> release_store::Result<Release> {
        self.driver.delete(key)
    }
}

/// Remove every release visible to `driver`.
pub fn truncate_driver(driver: &dyn Driver) -> anyhow::Result<()> {
    for release in driver.list(&|_| true)? {
        driver.delete(&release.key())?;
    }
    Ok(())
}

#[fixture]
pub fn memory_driver() -> TestDriver {
    TestDriver::new(MemoryConfig::new().open().unwrap())
}

#[fixture]
pub fn config_map_driver() -> TestDriver {
    let config = ObjectConfig {
        client: MemoryObjects::new(),
        kind: ObjectKind::ConfigMap,
    };
    TestDriver::new(config.open().unwrap())
}

#[fixture]
pub fn secret_driver() -> TestDriver {
    let config = ObjectConfig {
        client: MemoryObjects::new(),
        kind: ObjectKind::Secret,
    };
    TestDriver::new(config.open().unwrap())
}

#[fixture]
pub fn chunked_driver() -> TestDriver {
    let config = ChunkedConfig {
        client: MemoryObjects::with_size_limit(TEST_CHUNK_SIZE),
        kind: ObjectKind::Secret,
        chunking: ChunkingConfig::new(TEST_CHUNK_SIZE).unwrap(),
    };
    TestDriver::new(config.open().unwrap())
}

#[fixture]
pub fn blob_driver() -> TestDriver {
    let config = BlobConfig {
        client: MemoryBlobs::new(),
        prefix: String::from("releases"),
        namespace: None,
    };
    TestDriver::new(config.open().unwrap())
}

#[cfg(feature = "store-sqlite")]
#[fixture]
pub fn sql_driver() -> TestDriver {
    let directory = tempfile::tempdir().unwrap();
    let config = SqliteConfig::new(directory.path().join("releases.db"));
    let driver = config.open().unwrap();
    TestDriver::with_directory(directory, driver)
}

#[cfg(feature = "store-directory")]
#[fixture]
pub fn directory_driver() -> TestDriver {
    let directory = tempfile::tempdir().unwrap();
    let config = DirectoryConfig {
        path: directory.path().join("releases"),
        namespace: None,
    };
    let driver = config.open().unwrap();
    TestDriver::with_directory(directory, driver)
}

/// Every driver which needs no external service.
#[fixture]
pub fn local_drivers() -> Vec<TestDriver> {
    #[allow(unused_mut)]
    let mut drivers = vec![
        memory_driver(),
        config_map_driver(),
        secret_driver(),
        chunked_driver(),
        blob_driver(),
    ];
    #[cfg(feature = "store-sqlite")]
    drivers.push(sql_driver());
    #[cfg(feature = "store-directory")]
    drivers.push(directory_driver());
    drivers
}

#[cfg(feature = "store-redis")]
pub fn redis_driver() -> anyhow::Result<TestDriver> {
    let config = RedisConfig {
        url: dotenv::var("REDIS_URL")?,
        prefix: String::from("release-store-test"),
        kind: ObjectKind::Secret,
        chunking: ChunkingConfig::new(TEST_CHUNK_SIZE)?,
    };
    let driver = config.open()?;
    truncate_driver(&driver)?;
    Ok(TestDriver::new(driver))
}

#[cfg(feature = "store-s3")]
pub fn s3_driver() -> anyhow::Result<TestDriver> {
    let prefix: String = SmallRng::from_entropy()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    let config = S3Config {
        bucket: dotenv::var("S3_BUCKET")?,
        region: S3Region {
            name: dotenv::var("S3_REGION")?,
            endpoint: dotenv::var("S3_ENDPOINT").ok(),
        },
        credentials: S3Credentials::Basic {
            access_key: dotenv::var("S3_ACCESS_KEY")?,
            secret_key: dotenv::var("S3_SECRET_KEY")?,
        },
        prefix: format!("test/{}", prefix),
        namespace: None,
    };
    let driver = config.open()?;
    truncate_driver(&driver)?;
    Ok(TestDriver::new(driver))
}
