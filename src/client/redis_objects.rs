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

#![cfg(feature = "store-redis")]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use redis::{
    Client, Commands, Connection, ConnectionAddr, ConnectionInfo, IntoConnectionInfo,
    RedisConnectionInfo, Script,
};

use super::{ClientError, ClientResult, ObjectClient, StoredObject};

/// The prefix of hash fields which hold object labels.
const LABEL_FIELD_PREFIX: &str = "label:";

/// The prefix of hash fields which hold object data.
const DATA_FIELD_PREFIX: &str = "data:";

/// Create the hash `KEYS[1]` from the field/value pairs in `ARGV` unless it exists.
const CREATE_SCRIPT: &str = r#"
    if redis.call('EXISTS', KEYS[1]) == 1 then
        return 0
    end
    redis.call('HSET', KEYS[1], unpack(ARGV))
    return 1
"#;

/// Replace the hash `KEYS[1]` with the field/value pairs in `ARGV` if it exists.
const UPDATE_SCRIPT: &str = r#"
    if redis.call('EXISTS', KEYS[1]) == 0 then
        return 0
    end
    redis.call('DEL', KEYS[1])
    redis.call('HSET', KEYS[1], unpack(ARGV))
    return 1
"#;

/// The address for a Redis connection.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(docsrs, doc(cfg(feature = "store-redis")))]
pub enum RedisAddr {
    /// A hostname and port.
    Tcp(String, u16),

    /// The path of a Unix socket.
    Unix(PathBuf),
}

/// An `ObjectClient` which stores each object as a hash on a Redis server.
///
/// Objects are stored under `<prefix>:<name>`, with one hash field per label and per data field.
/// Creates and updates run as server-side scripts, so a create never overwrites an existing
/// object.
#[cfg_attr(docsrs, doc(cfg(feature = "store-redis")))]
pub struct RedisObjects {
    connection: Mutex<Connection>,
    prefix: String,
    size_limit: Option<usize>,
}

impl Debug for RedisObjects {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisObjects")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisObjects {
    /// Connect to the server at `addr` and store objects under `prefix`.
    pub fn connect(
        addr: RedisAddr,
        db: i64,
        username: Option<String>,
        password: Option<String>,
        prefix: impl Into<String>,
        size_limit: Option<usize>,
    ) -> anyhow::Result<Self> {
        let info = ConnectionInfo {
            addr: match addr {
                RedisAddr::Tcp(host, port) => ConnectionAddr::Tcp(host, port),
                RedisAddr::Unix(path) => ConnectionAddr::Unix(path),
            },
            redis: RedisConnectionInfo {
                db,
                username,
                password,
            },
        };
        let connection = Client::open(info)?.get_connection()?;
        Ok(RedisObjects {
            connection: Mutex::new(connection),
            prefix: prefix.into(),
            size_limit,
        })
    }

    /// Connect to the server at `url` and store objects under `prefix`.
    ///
    /// For a TCP connection, the URL format is:
    /// `redis://[<username>][:<passwd>@]<hostname>[:port][/<db>]`.
    pub fn from_url(
        url: &str,
        prefix: impl Into<String>,
        size_limit: Option<usize>,
    ) -> anyhow::Result<Self> {
        let info = url.into_connection_info()?;
        let addr = match info.addr {
            ConnectionAddr::Tcp(host, port) => RedisAddr::Tcp(host, port),
            ConnectionAddr::TcpTls { host, port, .. } => RedisAddr::Tcp(host, port),
            ConnectionAddr::Unix(path) => RedisAddr::Unix(path),
        };
        Self::connect(
            addr,
            info.redis.db,
            info.redis.username,
            info.redis.password,
            prefix,
            size_limit,
        )
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn object_key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    fn check_size(&self, object: &StoredObject) -> ClientResult<()> {
        match self.size_limit {
            Some(limit) if object.size() > limit => Err(ClientError::TooLarge {
                size: object.size(),
                limit,
            }),
            _ => Ok(()),
        }
    }

    /// Run one of the write scripts for `object`, returning whether it wrote anything.
    fn write(&self, source: &str, object: &StoredObject) -> ClientResult<bool> {
        let script = Script::new(source);
        let mut invocation = script.key(self.object_key(&object.name));
        for (key, value) in &object.labels {
            invocation.arg(format!("{}{}", LABEL_FIELD_PREFIX, key));
            invocation.arg(value.as_bytes());
        }
        for (key, value) in &object.data {
            invocation.arg(format!("{}{}", DATA_FIELD_PREFIX, key));
            invocation.arg(value.as_slice());
        }
        let written: i32 = invocation
            .invoke(&mut *self.connection())
            .map_err(anyhow::Error::from)?;
        Ok(written == 1)
    }

    fn read(&self, connection: &mut Connection, name: &str) -> ClientResult<Option<StoredObject>> {
        let fields: HashMap<String, Vec<u8>> = connection
            .hgetall(self.object_key(name))
            .map_err(anyhow::Error::from)?;
        if fields.is_empty() {
            return Ok(None);
        }

        let mut object = StoredObject {
            name: name.to_string(),
            ..StoredObject::default()
        };
        for (field, value) in fields {
            if let Some(key) = field.strip_prefix(LABEL_FIELD_PREFIX) {
                let value = String::from_utf8(value).map_err(anyhow::Error::from)?;
                object.labels.insert(key.to_string(), value);
            } else if let Some(key) = field.strip_prefix(DATA_FIELD_PREFIX) {
                object.data.insert(key.to_string(), value);
            }
        }
        Ok(Some(object))
    }
}

impl ObjectClient for RedisObjects {
    fn get(&self, name: &str) -> ClientResult<Option<StoredObject>> {
        self.read(&mut self.connection(), name)
    }

    fn create(&self, object: &StoredObject) -> ClientResult<()> {
        self.check_size(object)?;
        if self.write(CREATE_SCRIPT, object)? {
            Ok(())
        } else {
            Err(ClientError::AlreadyExists)
        }
    }

    fn update(&self, object: &StoredObject) -> ClientResult<()> {
        self.check_size(object)?;
        if self.write(UPDATE_SCRIPT, object)? {
            Ok(())
        } else {
            Err(ClientError::NotFound)
        }
    }

    fn delete(&self, name: &str) -> ClientResult<()> {
        let removed: i32 = self
            .connection()
            .del(self.object_key(name))
            .map_err(anyhow::Error::from)?;
        if removed == 0 {
            return Err(ClientError::NotFound);
        }
        Ok(())
    }

    fn list(&self, selector: &BTreeMap<String, String>) -> ClientResult<Vec<StoredObject>> {
        let key_prefix = format!("{}:", self.prefix);
        let mut connection = self.connection();
        // SCAN may return a key more than once.
        let keys: BTreeSet<String> = connection
            .scan_match(format!("{}*", key_prefix))
            .map_err(anyhow::Error::from)?
            .collect();

        let mut objects = Vec::new();
        for key in keys {
            let name = match key.strip_prefix(&key_prefix) {
                Some(name) => name,
                None => continue,
            };
            if let Some(object) = self.read(&mut connection, name)? {
                let selected = selector
                    .iter()
                    .all(|(key, value)| object.labels.get(key) == Some(value));
                if selected {
                    objects.push(object);
                }
            }
        }
        Ok(objects)
    }
}
