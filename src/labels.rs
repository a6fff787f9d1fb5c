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

//! Labels attached to stored release objects.
//!
//! Every stored object carries a set of string labels which drivers use as a secondary index.
//! System labels are always written by the driver; custom labels are supplied by the caller in
//! [`Release::labels`] and can never shadow a system label.
//!
//! [`Release::labels`]: crate::release::Release::labels

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::release::Release;

/// The value of the `owner` label on every object owned by this package manager.
pub const OWNER: &str = "helm";

pub const NAME_LABEL: &str = "name";
pub const OWNER_LABEL: &str = "owner";
pub const STATUS_LABEL: &str = "status";
pub const VERSION_LABEL: &str = "version";
pub const CREATED_AT_LABEL: &str = "createdAt";
pub const MODIFIED_AT_LABEL: &str = "modifiedAt";

/// The label keys which are reserved for drivers.
pub const SYSTEM_LABELS: [&str; 6] = [
    NAME_LABEL,
    OWNER_LABEL,
    STATUS_LABEL,
    VERSION_LABEL,
    CREATED_AT_LABEL,
    MODIFIED_AT_LABEL,
];

/// The maximum length of a label value.
const MAX_LABEL_VALUE_LEN: usize = 63;

static LABEL_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").unwrap());

/// Return whether `key` is reserved for drivers.
pub fn is_system_label(key: &str) -> bool {
    SYSTEM_LABELS.contains(&key)
}

/// Return whether `value` may be used as the value of a label.
///
/// A label value is at most 63 characters, and is either empty or consists of alphanumerics,
/// `-`, `_` and `.` beginning and ending with an alphanumeric.
pub fn is_valid_label_value(value: &str) -> bool {
    value.len() <= MAX_LABEL_VALUE_LEN && LABEL_VALUE.is_match(value)
}

/// Return a copy of `labels` with every system label removed.
pub fn filter_system_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter(|(key, _)| !is_system_label(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Return whether any key in `labels` is a system label.
pub fn contains_system_labels(labels: &BTreeMap<String, String>) -> bool {
    labels.keys().any(|key| is_system_label(key))
}

/// Check that the caller-supplied `labels` can be stored.
///
/// # Errors
/// - `Error::Validation`: A key is empty or reserved, or a value is not a valid label value.
pub fn validate_custom_labels(labels: &BTreeMap<String, String>) -> crate::Result<()> {
    for (key, value) in labels {
        if key.is_empty() {
            return Err(crate::Error::Validation(String::from("empty label key")));
        }
        if is_system_label(key) {
            return Err(crate::Error::Validation(format!(
                "label {:?} is reserved for the storage driver",
                key
            )));
        }
        if !is_valid_label_value(value) {
            return Err(crate::Error::Validation(format!(
                "invalid value {:?} for label {:?}",
                value, key
            )));
        }
    }
    Ok(())
}

/// An immutable set of labels.
///
/// Use [`LabelsBuilder`] to construct one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Labels {
    map: BTreeMap<String, String>,
}

impl Labels {
    /// Return a new empty [`LabelsBuilder`].
    pub fn builder() -> LabelsBuilder {
        LabelsBuilder::new()
    }

    /// Return the value of the label with the given `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Return an iterator over the labels in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Return whether every label in `filter` is present in this set with the same value.
    pub fn matches(&self, filter: &BTreeMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.map.get(key) == Some(value))
    }

    /// Return the number of labels.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Return whether there are no labels.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Return a copy of these labels as a map.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.map.clone()
    }

    /// Consume these labels and return them as a map.
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.map
    }
}

impl From<Labels> for BTreeMap<String, String> {
    fn from(labels: Labels) -> Self {
        labels.into_map()
    }
}

/// A builder for a [`Labels`] set.
#[derive(Debug, Clone, Default)]
pub struct LabelsBuilder {
    map: BTreeMap<String, String>,
}

impl LabelsBuilder {
    /// Return a new empty builder.
    pub fn new() -> Self {
        LabelsBuilder {
            map: BTreeMap::new(),
        }
    }

    /// Set the label `key` to `value`, replacing any existing value.
    pub fn set(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.map.insert(key.into(), value.to_string());
        self
    }

    /// Merge the caller-supplied `labels` into this set.
    ///
    /// System labels in `labels` are skipped, so custom labels can never shadow them.
    pub fn custom(mut self, labels: &BTreeMap<String, String>) -> Self {
        for (key, value) in labels {
            if !is_system_label(key) {
                self.map.insert(key.clone(), value.clone());
            }
        }
        self
    }

    /// Set the `name`, `owner`, `status` and `version` labels from `release`.
    pub fn system(self, release: &Release) -> Self {
        self.set(NAME_LABEL, &release.name)
            .set(OWNER_LABEL, OWNER)
            .set(STATUS_LABEL, release.info.status)
            .set(VERSION_LABEL, release.version)
    }

    /// Build the label set.
    pub fn build(self) -> Labels {
        Labels { map: self.map }
    }
}
