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

//! The release record and its storage encoding.
//!
//! A [`Release`] is one revision of a named package instance. Drivers store releases as the opaque
//! string produced by [`encode`], which can be turned back into an identical release with
//! [`decode`].

pub use self::codec::{decode, encode};
pub use self::release::{make_key, parse_key, sort_by_revision, Info, Release, Status};

mod codec;
mod release;
