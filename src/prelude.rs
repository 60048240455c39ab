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

//! Common imports

pub use crate::batch::{BatchMut, BatchRef};
pub use crate::component::{register_component, Bundle, Component, ComponentId};
pub use crate::dynamic_query::{ComponentAccess, DynamicQuery, DynamicQueryCursor};
pub use crate::entity::EntityId;
pub use crate::error::{EcsError, Result};
pub use crate::filter::QueryResultTuple;
pub use crate::join::JoinData;
pub use crate::query::{Any, Batch, Changed, Join, Maybe, Query, Without};
pub use crate::reflection::{Reflect, ReflectValue};
pub use crate::storage::{BatchStorage, DenseVecStorage, Storage, StorageBase};
pub use crate::system::SystemExeInfo;
pub use crate::world::World;
pub use crate::impl_component;
pub use slotmap::Key;
