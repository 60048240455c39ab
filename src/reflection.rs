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

//! Named-field reflection used by dynamic queries.
//!
//! Every component implements [`Reflect`]. Plain tags keep the default
//! (no fields); structured components list their fields through
//! [`impl_component!`](crate::impl_component), which generates the lookups.

use std::any::Any;

use glam::{Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Trait for runtime field access
pub trait Reflect: Any + Send + Sync {
    /// Get type name
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Names of the reflected fields, in declaration order
    fn field_names(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Read a field by name
    fn get_field(&self, _name: &str) -> Option<ReflectValue> {
        None
    }

    /// Write a field by name.
    ///
    /// Returns `false` and leaves the value untouched when the field is
    /// unknown or the value variant does not match the field type.
    fn set_field(&mut self, _name: &str, _value: ReflectValue) -> bool {
        false
    }
}

/// Dynamic value storage for reflection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReflectValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vec2(Vec2),
    Vec3(Vec3),
    Quat(Quat),
}

impl ReflectValue {
    /// Short name of the variant, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            ReflectValue::Bool(_) => "bool",
            ReflectValue::Int(_) => "int",
            ReflectValue::Float(_) => "float",
            ReflectValue::String(_) => "string",
            ReflectValue::Vec2(_) => "vec2",
            ReflectValue::Vec3(_) => "vec3",
            ReflectValue::Quat(_) => "quat",
        }
    }

    /// True when both values carry the same variant
    pub fn same_kind(&self, other: &ReflectValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

macro_rules! impl_value_conversions {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for ReflectValue {
                fn from(value: $t) -> Self {
                    ReflectValue::$variant(value)
                }
            }

            impl TryFrom<ReflectValue> for $t {
                type Error = ReflectValue;

                fn try_from(value: ReflectValue) -> Result<Self, Self::Error> {
                    match value {
                        ReflectValue::$variant(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

impl_value_conversions!(
    bool => Bool,
    i64 => Int,
    f64 => Float,
    String => String,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Quat => Quat,
);

// Narrow integers travel as `Int` and are range-checked on the way back
macro_rules! impl_int_conversions {
    ($($t:ty),*) => {
        $(
            impl From<$t> for ReflectValue {
                fn from(value: $t) -> Self {
                    ReflectValue::Int(i64::from(value))
                }
            }

            impl TryFrom<ReflectValue> for $t {
                type Error = ReflectValue;

                fn try_from(value: ReflectValue) -> Result<Self, Self::Error> {
                    match value {
                        ReflectValue::Int(inner) => {
                            <$t>::try_from(inner).map_err(|_| ReflectValue::Int(inner))
                        }
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

impl_int_conversions!(i32, u32);

impl From<f32> for ReflectValue {
    fn from(value: f32) -> Self {
        ReflectValue::Float(f64::from(value))
    }
}

impl TryFrom<ReflectValue> for f32 {
    type Error = ReflectValue;

    fn try_from(value: ReflectValue) -> Result<Self, Self::Error> {
        match value {
            ReflectValue::Float(inner) => Ok(inner as f32),
            other => Err(other),
        }
    }
}

impl From<&str> for ReflectValue {
    fn from(value: &str) -> Self {
        ReflectValue::String(value.to_string())
    }
}
