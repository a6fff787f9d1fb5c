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
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The separator between a release name and its version in a key.
const KEY_SEPARATOR: &str = ".v";

/// The status of a release revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// The status of the release is not known.
    #[default]
    Unknown,

    /// The release has been pushed to the cluster.
    Deployed,

    /// The release has been uninstalled.
    Uninstalled,

    /// The release has been replaced by a newer revision.
    Superseded,

    /// The release failed to deploy.
    Failed,

    /// The release is being uninstalled.
    Uninstalling,

    /// The release is being installed.
    PendingInstall,

    /// The release is being upgraded.
    PendingUpgrade,

    /// The release is being rolled back.
    PendingRollback,
}

impl Status {
    /// Every status, in declaration order.
    pub const ALL: [Status; 9] = [
        Status::Unknown,
        Status::Deployed,
        Status::Uninstalled,
        Status::Superseded,
        Status::Failed,
        Status::Uninstalling,
        Status::PendingInstall,
        Status::PendingUpgrade,
        Status::PendingRollback,
    ];

    /// Return the name of this status as it is stored in labels and columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Deployed => "deployed",
            Status::Uninstalled => "uninstalled",
            Status::Superseded => "superseded",
            Status::Failed => "failed",
            Status::Uninstalling => "uninstalling",
            Status::PendingInstall => "pending-install",
            Status::PendingUpgrade => "pending-upgrade",
            Status::PendingRollback => "pending-rollback",
        }
    }

    /// Return whether this status is one of the transitional pending states.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Status::PendingInstall | Status::PendingUpgrade | Status::PendingRollback
        )
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| crate::Error::Validation(format!("unknown release status {:?}", s)))
    }
}

/// Information about the deployment of a release revision.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Info {
    /// When the release was first deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_deployed: Option<DateTime<Utc>>,

    /// When this revision was deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deployed: Option<DateTime<Utc>>,

    /// When the release was uninstalled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,

    /// A human-friendly description of this revision.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// The status of this revision.
    #[serde(default)]
    pub status: Status,

    /// The rendered notes of the chart.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

/// One revision of a named package instance.
///
/// Everything except the fields which are promoted to labels, columns or metadata is opaque to the
/// drivers. The `labels` of a release are never part of its encoded payload; drivers store the
/// custom labels next to the payload and restore them on read.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Release {
    /// The name of the release, stable across revisions.
    pub name: String,

    /// Deployment information for this revision.
    #[serde(default)]
    pub info: Info,

    /// The chart metadata this revision was rendered from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<Value>,

    /// The resolved configuration values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,

    /// The rendered manifest text.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manifest: String,

    /// The lifecycle hooks of this revision.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<Value>,

    /// The revision number, starting at 1.
    #[serde(default)]
    pub version: u32,

    /// The namespace the release is deployed to.
    #[serde(default)]
    pub namespace: String,

    /// Caller-supplied labels.
    #[serde(skip)]
    pub labels: BTreeMap<String, String>,
}

impl Release {
    /// Return the storage key of this revision.
    pub fn key(&self) -> String {
        make_key(&self.name, self.version)
    }

    /// Return the status of this revision.
    pub fn status(&self) -> Status {
        self.info.status
    }
}

/// Return the storage key for revision `version` of the release `name`.
pub fn make_key(name: &str, version: u32) -> String {
    format!("{}{}{}", name, KEY_SEPARATOR, version)
}

/// Split a storage `key` into the release name and version.
///
/// # Errors
/// - `Error::Validation`: The key is not of the form `<name>.v<version>`.
pub fn parse_key(key: &str) -> crate::Result<(&str, u32)> {
    let invalid = || crate::Error::Validation(format!("invalid release key {:?}", key));
    let (name, version) = key.rsplit_once(KEY_SEPARATOR).ok_or_else(invalid)?;
    if name.is_empty() {
        return Err(invalid());
    }
    let version = version.parse::<u32>().map_err(|_| invalid())?;
    Ok((name, version))
}

/// Sort `releases` by ascending version.
pub fn sort_by_revision(releases: &mut [Release]) {
    releases.sort_by_key(|release| release.version);
}
