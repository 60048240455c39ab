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

//! Error types

use std::fmt;

use crate::component::ComponentId;

/// ECS error type
#[derive(Debug, Clone, PartialEq)]
pub enum EcsError {
    /// Entity not found (never allocated or already despawned)
    EntityNotFound,

    /// Component id is not known to the registry
    ComponentNotRegistered(ComponentId),

    /// A component with this name is already registered
    DuplicateComponent(String),

    /// Dynamic query cannot be executed
    InvalidQuery(String),

    /// Two terms of one query would hand out aliasing mutable access
    ConflictingAccess(String),

    /// Storage slot holds a different storage type than requested
    StorageTypeMismatch(String),

    /// Storage does not support the requested operation
    UnsupportedOperation(String),

    /// Script component has no field with this name
    UnknownField(String),

    /// Value variant does not match the field type
    FieldTypeMismatch { field: String },

    /// Deserialization error (component descriptors)
    DeserializationError(String),

    /// Tracing subscriber could not be installed
    TracingInit(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound => write!(f, "Entity not found"),
            EcsError::ComponentNotRegistered(id) => write!(f, "Component {id} is not registered"),
            EcsError::DuplicateComponent(name) => {
                write!(f, "Component '{name}' is already registered")
            }
            EcsError::InvalidQuery(msg) => write!(f, "Invalid query: {msg}"),
            EcsError::ConflictingAccess(msg) => write!(f, "Conflicting query access: {msg}"),
            EcsError::StorageTypeMismatch(msg) => write!(f, "Storage type mismatch: {msg}"),
            EcsError::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {msg}"),
            EcsError::UnknownField(name) => write!(f, "Unknown field '{name}'"),
            EcsError::FieldTypeMismatch { field } => {
                write!(f, "Value type does not match field '{field}'")
            }
            EcsError::DeserializationError(msg) => write!(f, "Deserialization error: {msg}"),
            EcsError::TracingInit(msg) => write!(f, "Tracing init error: {msg}"),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<serde_json::Error> for EcsError {
    fn from(err: serde_json::Error) -> Self {
        EcsError::DeserializationError(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
