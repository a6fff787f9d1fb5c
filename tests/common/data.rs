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

use rand::distributions::Alphanumeric;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rstest::*;

use release_store::release::{Release, Status};

/// The minimum length of test manifests.
pub const MIN_MANIFEST_LEN: usize = 256;

/// The maximum length of test manifests.
pub const MAX_MANIFEST_LEN: usize = 1024;

/// Return a manifest of `len` random characters, which compresses poorly.
pub fn random_manifest(len: usize) -> String {
    SmallRng::from_entropy()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Return revision `version` of the release `name` in the default namespace.
pub fn new_release(name: &str, version: u32, status: Status) -> Release {
    let mut rng = SmallRng::from_entropy();
    let mut release = Release {
        name: name.to_string(),
        version,
        namespace: String::from("default"),
        manifest: random_manifest(rng.gen_range(MIN_MANIFEST_LEN..MAX_MANIFEST_LEN)),
        ..Release::default()
    };
    release.info.status = status;
    release.info.description = format!("Revision {} of {}", version, name);
    release
}

/// Return a release with a manifest of `len` random characters.
pub fn large_release(name: &str, version: u32, len: usize) -> Release {
    let mut release = new_release(name, version, Status::Deployed);
    release.manifest = random_manifest(len);
    release
}

/// Return a deployed first revision.
#[fixture]
pub fn release() -> Release {
    new_release("wordpress", 1, Status::Deployed)
}
