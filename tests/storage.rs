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

use release_store::release::{Release, Status};
use release_store::storage::{Storage, StorageConfig};

use common::*;

mod common;

fn storage(driver: TestDriver, max_history: usize) -> Storage<TestDriver> {
    Storage::new(driver, StorageConfig { max_history })
}

fn versions(releases: Vec<Release>) -> Vec<u32> {
    let mut versions = releases
        .into_iter()
        .map(|release| release.version)
        .collect::<Vec<_>>();
    versions.sort_unstable();
    versions
}

/// Store revisions `1..=count` of `name`, with only the last one deployed.
fn install(storage: &Storage<TestDriver>, name: &str, count: u32) -> anyhow::Result<()> {
    for version in 1..=count {
        if version > 1 {
            let mut previous = storage.get(name, version - 1)?;
            previous.info.status = Status::Superseded;
            storage.update(&previous)?;
        }
        storage.create(&new_release(name, version, Status::Deployed))?;
    }
    Ok(())
}

#[rstest]
fn revisions_are_addressed_by_name_and_version(local_drivers: Vec<TestDriver>) -> anyhow::Result<()> {
    for driver in local_drivers {
        let storage = storage(driver, 0);
        let release = new_release("wordpress", 2, Status::Deployed);
        storage.create(&release)?;

        assert_eq!(storage.get("wordpress", 2)?, release);
        assert_that!(storage.get("wordpress", 1)).is_err_variant(release_store::Error::NotFound);
        assert_eq!(storage.delete("wordpress", 2)?, release);
        assert_that!(storage.delete("wordpress", 2)).is_err_variant(release_store::Error::NotFound);
    }
    Ok(())
}

#[rstest]
fn history_and_last_span_every_revision(local_drivers: Vec<TestDriver>) -> anyhow::Result<()> {
    for driver in local_drivers {
        let storage = storage(driver, 0);
        install(&storage, "wordpress", 3)?;
        install(&storage, "redis", 1)?;

        assert_eq!(versions(storage.history("wordpress")?), vec![1, 2, 3]);
        assert_eq!(storage.last("wordpress")?.version, 3);
        assert_eq!(storage.deployed("wordpress")?.version, 3);
        assert_eq!(versions(storage.deployed_all("wordpress")?), vec![3]);
        assert_that!(storage.history("ghost")).is_err_variant(release_store::Error::NotFound);
        assert_that!(storage.deployed("ghost")).is_err_variant(release_store::Error::NotFound);
    }
    Ok(())
}

#[rstest]
fn listings_filter_by_status(local_drivers: Vec<TestDriver>) -> anyhow::Result<()> {
    for driver in local_drivers {
        let storage = storage(driver, 0);
        install(&storage, "wordpress", 2)?;
        storage.create(&new_release("redis", 1, Status::Uninstalled))?;

        assert_eq!(storage.list_releases()?.len(), 3);
        assert_eq!(versions(storage.list_deployed()?), vec![2]);
        let uninstalled = storage.list_uninstalled()?;
        assert_eq!(uninstalled.len(), 1);
        assert_eq!(uninstalled[0].name, "redis");
    }
    Ok(())
}

#[rstest]
fn history_is_pruned_to_the_limit(local_drivers: Vec<TestDriver>) -> anyhow::Result<()> {
    for driver in local_drivers {
        let storage = storage(driver, 3);
        install(&storage, "wordpress", 5)?;
        install(&storage, "redis", 2)?;

        assert_eq!(versions(storage.history("wordpress")?), vec![3, 4, 5]);
        assert_eq!(versions(storage.history("redis")?), vec![1, 2]);
    }
    Ok(())
}

#[rstest]
fn pruning_keeps_the_last_deployed_revision(memory_driver: TestDriver) -> anyhow::Result<()> {
    let storage = storage(memory_driver, 2);
    storage.create(&new_release("wordpress", 1, Status::Deployed))?;
    for version in 2..=4 {
        storage.create(&new_release("wordpress", version, Status::Failed))?;
    }

    assert_eq!(versions(storage.history("wordpress")?), vec![1, 4]);
    assert_eq!(storage.deployed("wordpress")?.version, 1);
    Ok(())
}

#[rstest]
fn unlimited_history_is_never_pruned(memory_driver: TestDriver) -> anyhow::Result<()> {
    let storage = storage(memory_driver, 0);
    install(&storage, "wordpress", 12)?;
    assert_eq!(storage.history("wordpress")?.len(), 12);
    Ok(())
}

#[rstest]
fn existing_revision_is_not_replaced(memory_driver: TestDriver) -> anyhow::Result<()> {
    let storage = storage(memory_driver, 0);
    let release = new_release("wordpress", 1, Status::Deployed);
    storage.create(&release)?;

    assert_that!(storage.create(&new_release("wordpress", 1, Status::Failed)))
        .is_err_variant(release_store::Error::AlreadyExists);
    assert_eq!(storage.get("wordpress", 1)?, release);
    Ok(())
}
