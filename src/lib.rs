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

//! Storage ECS - per-component storages with a composable query engine
//!
//! Every component type owns a storage chosen at registration
//! ([`DenseVecStorage`] by default, [`BatchStorage`] for several instances
//! per entity, [`ScriptStorage`] for components described at runtime).
//! Queries combine filters (`With`, [`Without`], [`Maybe`], [`Changed`],
//! [`Batch`], [`Any`], [`Join`]) either statically through [`Query`] or at
//! runtime through [`DynamicQuery`].

pub mod batch;
mod bitset;
pub mod component;
pub mod dynamic_query;
pub mod entity;
pub mod error;
pub mod filter;
pub mod join;
pub mod prelude;
#[cfg(feature = "profiling")]
pub mod profiling;
pub mod query;
pub mod reflection;
pub mod script;
pub mod storage;
pub mod system;
pub mod world;

pub use batch::*;
pub use component::*;
pub use dynamic_query::*;
pub use entity::*;
pub use error::*;
pub use filter::*;
pub use join::*;
pub use query::*;
pub use reflection::*;
pub use script::*;
pub use storage::*;
pub use system::*;
pub use world::*;
