// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Profiling
//!
//! Enable the `profiling` feature:
//!
//! ```toml
//! [dependencies]
//! storage_ecs = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! Query construction, dynamic `begin` and `World::spawn` then open
//! `tracing` spans, and batch storages trace dropped instances. Install a
//! subscriber once at startup:
//!
//! ```ignore
//! storage_ecs::profiling::init_tracing(tracing::Level::DEBUG)?;
//!
//! let mut query = world.query::<(&Transform,)>();
//! ```
//!
//! Profile in release mode for meaningful timings.

pub use tracing::Level;

use crate::error::{EcsError, Result};

/// Install a JSON `fmt` subscriber writing to stdout.
///
/// Fails with [`EcsError::TracingInit`] when a global subscriber is already set.
pub fn init_tracing(max_level: Level) -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .try_init()
        .map_err(|err| EcsError::TracingInit(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Either this call installs the subscriber or another test already did
        let _ = init_tracing(Level::TRACE);
        assert!(matches!(
            init_tracing(Level::TRACE),
            Err(EcsError::TracingInit(_))
        ));
    }
}
