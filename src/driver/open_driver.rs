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

use super::common::Driver;

/// A value which can be used to open a `Driver`.
pub trait OpenDriver {
    /// The type of `Driver` which this value can be used to open.
    type Driver: Driver + 'static;

    /// Open a driver of type `Driver`.
    ///
    /// This connects to the backend and prepares it for storing releases, creating any tables or
    /// directories the driver needs.
    ///
    /// # Errors
    /// - `Error::Validation`: The configuration is invalid.
    /// - `Error::Backend`: An error occurred while connecting to the backend.
    fn open(&self) -> crate::Result<Self::Driver>;
}
