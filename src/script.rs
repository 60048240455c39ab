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

//! Script components
//!
//! Components whose shape is only known at runtime. A
//! [`ScriptComponentDescriptor`] lists named fields with their defaults;
//! instances are [`DynamicComponent`] values held in a [`ScriptStorage`]
//! and reached through reflection only.

use std::any::Any;
use std::sync::Arc;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::reflection::{Reflect, ReflectValue};
use crate::storage::{ChangeTracker, DenseVecStorage, Storage, StorageBase};

/// One named field and its default value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptField {
    pub name: String,
    pub default: ReflectValue,
}

impl ScriptField {
    pub fn new(name: impl Into<String>, default: impl Into<ReflectValue>) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
        }
    }
}

/// Runtime shape of a script component
///
/// ```ignore
/// let descriptor = ScriptComponentDescriptor::from_json(r#"{
///     "name": "Stats",
///     "fields": [{ "name": "health", "default": { "Int": 100 } }]
/// }"#)?;
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptComponentDescriptor {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<ScriptField>,
}

impl ScriptComponentDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, default: impl Into<ReflectValue>) -> Self {
        self.fields.push(ScriptField::new(name, default));
        self
    }

    /// Parse and validate a JSON descriptor
    pub fn from_json(json: &str) -> Result<Self> {
        let descriptor: Self = serde_json::from_str(json)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Reject empty names and duplicate field names
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EcsError::DeserializationError(
                "script component name is empty".to_string(),
            ));
        }
        let mut seen = AHashSet::with_capacity(self.fields.len());
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(EcsError::DeserializationError(format!(
                    "{}: duplicate field `{}`",
                    self.name, field.name
                )));
            }
        }
        Ok(())
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }
}

/// Instance of a script component
#[derive(Clone, Debug, PartialEq)]
pub struct DynamicComponent {
    descriptor: Arc<ScriptComponentDescriptor>,
    values: Vec<ReflectValue>,
}

impl DynamicComponent {
    /// Instance with every field at its default
    pub fn new(descriptor: Arc<ScriptComponentDescriptor>) -> Self {
        let values = descriptor
            .fields
            .iter()
            .map(|field| field.default.clone())
            .collect();
        Self { descriptor, values }
    }

    pub fn descriptor(&self) -> &ScriptComponentDescriptor {
        &self.descriptor
    }

    pub fn get(&self, name: &str) -> Option<&ReflectValue> {
        let index = self.descriptor.field_index(name)?;
        self.values.get(index)
    }

    /// Overwrite a field. The value must keep the field's variant.
    pub fn set(&mut self, name: &str, value: ReflectValue) -> Result<()> {
        let index = self
            .descriptor
            .field_index(name)
            .ok_or_else(|| EcsError::UnknownField(name.to_string()))?;
        let slot = &mut self.values[index];
        if !slot.same_kind(&value) {
            return Err(EcsError::FieldTypeMismatch {
                field: name.to_string(),
            });
        }
        *slot = value;
        Ok(())
    }
}

impl Reflect for DynamicComponent {
    fn type_name(&self) -> &'static str {
        "DynamicComponent"
    }

    fn field_names(&self) -> Vec<&str> {
        self.descriptor
            .fields
            .iter()
            .map(|field| field.name.as_str())
            .collect()
    }

    fn get_field(&self, name: &str) -> Option<ReflectValue> {
        self.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: ReflectValue) -> bool {
        self.set(name, value).is_ok()
    }
}

/// Storage for one script component type
pub struct ScriptStorage {
    descriptor: Arc<ScriptComponentDescriptor>,
    inner: DenseVecStorage<DynamicComponent>,
}

impl ScriptStorage {
    pub fn new(descriptor: Arc<ScriptComponentDescriptor>) -> Self {
        Self {
            descriptor,
            inner: DenseVecStorage::new(),
        }
    }

    pub fn descriptor(&self) -> &Arc<ScriptComponentDescriptor> {
        &self.descriptor
    }

    pub fn get(&self, entity: EntityId) -> Option<&DynamicComponent> {
        self.inner.get(entity)
    }

    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut DynamicComponent> {
        self.inner.get_mut(entity)
    }
}

impl StorageBase for ScriptStorage {
    fn storage_name(&self) -> &'static str {
        "ScriptStorage"
    }

    fn has(&self, entity: EntityId) -> bool {
        self.inner.has(entity)
    }

    fn remove(&mut self, entity: EntityId) -> bool {
        self.inner.remove(entity)
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn stored_entities(&self) -> &[EntityId] {
        self.inner.stored_entities()
    }

    fn change_tracker(&self) -> &ChangeTracker {
        self.inner.change_tracker()
    }

    fn change_tracker_mut(&mut self) -> &mut ChangeTracker {
        self.inner.change_tracker_mut()
    }

    fn get_reflect(&self, entity: EntityId) -> Option<&dyn Reflect> {
        self.inner.get_reflect(entity)
    }

    fn get_reflect_mut(&mut self, entity: EntityId) -> Option<&mut dyn Reflect> {
        self.inner.get_reflect_mut(entity)
    }

    /// Insert an instance, starting from the defaults and applying `values`
    fn insert_dynamic(&mut self, entity: EntityId, values: Vec<(String, ReflectValue)>) -> Result<()> {
        let mut component = DynamicComponent::new(Arc::clone(&self.descriptor));
        for (name, value) in values {
            component.set(&name, value)?;
        }
        self.inner.insert(entity, component);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
