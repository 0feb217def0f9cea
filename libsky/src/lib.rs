/*
 * Created on Mon Jul 20 2020
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2020, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! The core library for kvd
//!
//! This contains small pieces shared across the server crate that don't
//! belong to any one module: version metadata and a generic result alias.

use std::error::Error;

/// A generic result, used at the edges (startup, tests) where a boxed
/// error is good enough and we don't want every caller matching on a
/// crate-wide enum
pub type TResult<T> = Result<T, Box<dyn Error>>;

/// The size of the read scratch buffer used by the event loop for a single
/// non-blocking `read()` call
pub const BUF_CAP: usize = 64 * 1024; // 64 KiB

/// The crate version, reused by the startup banner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
