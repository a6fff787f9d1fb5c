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

#![cfg(feature = "store-sqlite")]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};

use crate::labels::{
    self, CREATED_AT_LABEL, MODIFIED_AT_LABEL, NAME_LABEL, OWNER, OWNER_LABEL, STATUS_LABEL,
    VERSION_LABEL,
};
use crate::release::{decode, encode, Release};

use super::common::{timestamp, Driver, Filter, DEFAULT_NAMESPACE};
use super::open_driver::OpenDriver;

/// The value of the `type` column for every stored release.
const RELEASE_TYPE: &str = "helm.sh/release.v1";

/// The label keys which can be queried, and the columns which hold them.
const QUERY_COLUMNS: [(&str, &str); 6] = [
    (NAME_LABEL, "name"),
    (OWNER_LABEL, "owner"),
    (STATUS_LABEL, "status"),
    (VERSION_LABEL, "version"),
    (CREATED_AT_LABEL, "createdAt"),
    (MODIFIED_AT_LABEL, "modifiedAt"),
];

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS releases_v1 (
        key TEXT NOT NULL,
        type TEXT NOT NULL,
        body TEXT NOT NULL,
        name TEXT NOT NULL,
        namespace TEXT NOT NULL,
        version INTEGER NOT NULL,
        status TEXT NOT NULL,
        owner TEXT NOT NULL,
        createdAt INTEGER NOT NULL,
        modifiedAt INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (key, namespace)
    );

    CREATE INDEX IF NOT EXISTS releases_v1_name_index ON releases_v1 (name, namespace);
    CREATE INDEX IF NOT EXISTS releases_v1_status_index ON releases_v1 (status);

    CREATE TABLE IF NOT EXISTS custom_labels_v1 (
        release_key TEXT NOT NULL,
        release_namespace TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (release_key, release_namespace, key)
    );
"#;

/// The configuration for opening a [`SqlDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(docsrs, doc(cfg(feature = "store-sqlite")))]
pub struct SqliteConfig {
    /// The path of the database file, which is created if it does not exist.
    pub path: PathBuf,

    /// The namespace to read releases from and to restrict listings to.
    ///
    /// If this is `None`, reads use the `default` namespace and listings span every namespace.
    pub namespace: Option<String>,
}

impl SqliteConfig {
    /// Create a config for the database at `path` with no namespace.
    pub fn new(path: impl AsRef<Path>) -> Self {
        SqliteConfig {
            path: path.as_ref().to_path_buf(),
            namespace: None,
        }
    }
}

impl OpenDriver for SqliteConfig {
    type Driver = SqlDriver;

    fn open(&self) -> crate::Result<Self::Driver> {
        let mut driver = SqlDriver::open(&self.path)?;
        driver.namespace = self.namespace.clone();
        Ok(driver)
    }
}

/// A `Driver` which stores releases in a SQLite database.
///
/// Each release is one row of the `releases_v1` table, with the system labels in their own
/// columns. Custom labels are stored in `custom_labels_v1`. Queries are only supported on system
/// labels.
///
/// Writes which touch both tables run in one transaction, and the primary key on
/// `(key, namespace)` makes concurrent creates of the same key fail with `AlreadyExists`.
#[derive(Debug)]
#[cfg_attr(docsrs, doc(cfg(feature = "store-sqlite")))]
pub struct SqlDriver {
    connection: Mutex<Connection>,
    namespace: Option<String>,
}

/// Translate a SQLite error.
fn sql_error(operation: &'static str, key: &str) -> impl FnOnce(rusqlite::Error) -> crate::Error {
    let key = key.to_string();
    move |error| crate::Error::backend(operation, key, error)
}

/// Return the namespace a release is written to.
fn release_namespace(release: &Release) -> &str {
    if release.namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        &release.namespace
    }
}

/// Replace the custom labels of the release at `key` in `namespace`.
fn write_labels(
    transaction: &Transaction<'_>,
    key: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> rusqlite::Result<()> {
    transaction.execute(
        "DELETE FROM custom_labels_v1 WHERE release_key = ?1 AND release_namespace = ?2;",
        params![key, namespace],
    )?;
    let mut statement = transaction.prepare(
        r#"
            INSERT INTO custom_labels_v1 (release_key, release_namespace, key, value)
            VALUES (?1, ?2, ?3, ?4);
        "#,
    )?;
    for (label, value) in labels {
        statement.execute(params![key, namespace, label, value])?;
    }
    Ok(())
}

impl SqlDriver {
    /// Open or create a database at `path`.
    ///
    /// # Errors
    /// - `Error::Backend`: The database could not be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path_name = path.as_ref().to_string_lossy().into_owned();
        let connection = Connection::open(path).map_err(sql_error("open", &path_name))?;
        connection
            .execute_batch(SCHEMA)
            .map_err(sql_error("open", &path_name))?;
        Ok(SqlDriver {
            connection: Mutex::new(connection),
            namespace: None,
        })
    }

    /// Set the namespace this driver reads from.
    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        let namespace = namespace.into();
        self.namespace = if namespace.is_empty() {
            None
        } else {
            Some(namespace)
        };
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The namespace single-release operations act on.
    fn read_namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    fn read_labels(
        connection: &Connection,
        key: &str,
        namespace: &str,
    ) -> rusqlite::Result<BTreeMap<String, String>> {
        let mut statement = connection.prepare(
            r#"
                SELECT key, value FROM custom_labels_v1
                WHERE release_key = ?1 AND release_namespace = ?2;
            "#,
        )?;
        let rows = statement.query_map(params![key, namespace], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.collect()
    }

    /// Run a `SELECT key, namespace, body` statement and decode every row.
    ///
    /// Rows which cannot be decoded are skipped.
    fn select_releases(
        &self,
        operation: &'static str,
        sql: &str,
        values: &[String],
    ) -> crate::Result<Vec<Release>> {
        let connection = self.connection();
        let rows = connection
            .prepare(sql)
            .and_then(|mut statement| {
                let rows = statement.query_map(params_from_iter(values.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(sql_error(operation, ""))?;

        let mut releases = Vec::with_capacity(rows.len());
        for (key, namespace, body) in rows {
            let mut release = match decode(&body) {
                Ok(release) => release,
                Err(error) => {
                    tracing::warn!(
                        driver = self.name(),
                        %key,
                        %namespace,
                        %error,
                        "skipping release which could not be decoded"
                    );
                    continue;
                }
            };
            release.labels = Self::read_labels(&connection, &key, &namespace)
                .map_err(sql_error(operation, &key))?;
            releases.push(release);
        }
        Ok(releases)
    }
}

impl Driver for SqlDriver {
    fn name(&self) -> &'static str {
        "SQL"
    }

    fn get(&self, key: &str) -> crate::Result<Release> {
        let namespace = self.read_namespace();
        let connection = self.connection();
        let body: String = connection
            .query_row(
                r#"
                    SELECT body FROM releases_v1
                    WHERE key = ?1 AND namespace = ?2 AND owner = ?3;
                "#,
                params![key, namespace, OWNER],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_error("get", key))?
            .ok_or(crate::Error::NotFound)?;

        let mut release = decode(&body)?;
        release.labels =
            Self::read_labels(&connection, key, namespace).map_err(sql_error("get", key))?;
        Ok(release)
    }

    fn list(&self, filter: Filter<'_>) -> crate::Result<Vec<Release>> {
        let mut sql = String::from("SELECT key, namespace, body FROM releases_v1 WHERE owner = ?1");
        let mut values = vec![OWNER.to_string()];
        if let Some(namespace) = &self.namespace {
            sql.push_str(" AND namespace = ?2");
            values.push(namespace.clone());
        }

        let mut releases = self.select_releases("list", &sql, &values)?;
        releases.retain(|release| filter(release));
        Ok(releases)
    }

    fn query(&self, labels: &BTreeMap<String, String>) -> crate::Result<Vec<Release>> {
        let mut sql = String::from("SELECT key, namespace, body FROM releases_v1 WHERE owner = ?1");
        let mut values = vec![OWNER.to_string()];

        for (key, value) in labels {
            let column = QUERY_COLUMNS
                .iter()
                .find(|(label, _)| label == key)
                .map(|(_, column)| *column)
                .ok_or_else(|| {
                    crate::Error::Validation(format!("unknown label {:?}", key))
                })?;
            if !labels::is_valid_label_value(value) {
                return Err(crate::Error::Validation(format!(
                    "invalid value {:?} for label {:?}",
                    value, key
                )));
            }
            values.push(value.clone());
            sql.push_str(&format!(" AND {} = ?{}", column, values.len()));
        }

        if let Some(namespace) = &self.namespace {
            values.push(namespace.clone());
            sql.push_str(&format!(" AND namespace = ?{}", values.len()));
        }

        let releases = self.select_releases("query", &sql, &values)?;
        if releases.is_empty() {
            return Err(crate::Error::NotFound);
        }
        Ok(releases)
    }

    fn create(&self, key: &str, release: &Release) -> crate::Result<()> {
        labels::validate_custom_labels(&release.labels)?;
        let body = encode(release)?;
        let namespace = release_namespace(release);

        let mut connection = self.connection();
        let transaction = connection.transaction().map_err(sql_error("create", key))?;

        let inserted = transaction.execute(
            r#"
                INSERT INTO releases_v1
                    (key, type, body, name, namespace, version, status, owner, createdAt)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);
            "#,
            params![
                key,
                RELEASE_TYPE,
                body,
                release.name,
                namespace,
                release.version,
                release.info.status.as_str(),
                OWNER,
                timestamp(),
            ],
        );

        // The transaction is rolled back when it is dropped.
        if let Err(error) = inserted {
            let existing = transaction
                .query_row(
                    "SELECT key FROM releases_v1 WHERE key = ?1 AND namespace = ?2;",
                    params![key, namespace],
                    |_| Ok(()),
                )
                .optional()
                .map_err(sql_error("create", key))?;
            return match existing {
                Some(()) => {
                    tracing::debug!(driver = self.name(), key, namespace, "release already exists");
                    Err(crate::Error::AlreadyExists)
                }
                None => Err(crate::Error::backend("create", key, error)),
            };
        }

        write_labels(&transaction, key, namespace, &release.labels)
            .map_err(sql_error("create", key))?;
        transaction.commit().map_err(sql_error("create", key))
    }

    fn update(&self, key: &str, release: &Release) -> crate::Result<()> {
        labels::validate_custom_labels(&release.labels)?;
        let body = encode(release)?;
        let namespace = release_namespace(release);

        let mut connection = self.connection();
        let transaction = connection.transaction().map_err(sql_error("update", key))?;

        let updated = transaction
            .execute(
                r#"
                    UPDATE releases_v1
                    SET body = ?1, name = ?2, version = ?3, status = ?4, modifiedAt = ?5
                    WHERE key = ?6 AND namespace = ?7 AND owner = ?8;
                "#,
                params![
                    body,
                    release.name,
                    release.version,
                    release.info.status.as_str(),
                    timestamp(),
                    key,
                    namespace,
                    OWNER,
                ],
            )
            .map_err(sql_error("update", key))?;
        if updated == 0 {
            return Err(crate::Error::NotFound);
        }

        write_labels(&transaction, key, namespace, &release.labels)
            .map_err(sql_error("update", key))?;
        transaction.commit().map_err(sql_error("update", key))
    }

    fn delete(&self, key: &str) -> crate::Result<Release> {
        let namespace = self.read_namespace();
        let mut connection = self.connection();
        let transaction = connection.transaction().map_err(sql_error("delete", key))?;

        let body: String = transaction
            .query_row(
                r#"
                    SELECT body FROM releases_v1
                    WHERE key = ?1 AND namespace = ?2 AND owner = ?3;
                "#,
                params![key, namespace, OWNER],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_error("delete", key))?
            .ok_or(crate::Error::NotFound)?;
        let mut release = decode(&body)?;
        release.labels =
            Self::read_labels(&transaction, key, namespace).map_err(sql_error("delete", key))?;

        transaction
            .execute(
                "DELETE FROM releases_v1 WHERE key = ?1 AND namespace = ?2;",
                params![key, namespace],
            )
            .map_err(sql_error("delete", key))?;
        transaction
            .execute(
                "DELETE FROM custom_labels_v1 WHERE release_key = ?1 AND release_namespace = ?2;",
                params![key, namespace],
            )
            .map_err(sql_error("delete", key))?;
        transaction.commit().map_err(sql_error("delete", key))?;

        Ok(release)
    }
}
