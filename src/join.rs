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

//! Type-erased payload of `Any` and `Join` terms
//!
//! A [`JoinData`] remembers which component matched, the Rust type of the
//! pointee and whether it may be written. Casts compare the stored
//! [`TypeId`] first and return `None` on any mismatch.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::slice;

use crate::batch::{BatchMut, BatchRef};
use crate::component::ComponentId;

/// One-of-many component reference for a single entity
pub struct JoinData<'w> {
    ptr: Option<NonNull<u8>>,
    len: usize,
    batch: bool,
    type_id: Option<TypeId>,
    component: Option<ComponentId>,
    mutable: bool,
    _marker: PhantomData<&'w mut ()>,
}

impl<'w> JoinData<'w> {
    /// Empty payload: no child matched
    pub fn null() -> Self {
        Self {
            ptr: None,
            len: 0,
            batch: false,
            type_id: None,
            component: None,
            mutable: false,
            _marker: PhantomData,
        }
    }

    pub fn from_ref<T: 'static>(component: ComponentId, value: &'w T) -> Self {
        Self {
            ptr: Some(NonNull::from(value).cast()),
            len: 1,
            batch: false,
            type_id: Some(TypeId::of::<T>()),
            component: Some(component),
            mutable: false,
            _marker: PhantomData,
        }
    }

    pub fn from_mut<T: 'static>(component: ComponentId, value: &'w mut T) -> Self {
        Self {
            ptr: Some(NonNull::from(value).cast()),
            len: 1,
            batch: false,
            type_id: Some(TypeId::of::<T>()),
            component: Some(component),
            mutable: true,
            _marker: PhantomData,
        }
    }

    pub fn from_slice<T: 'static>(component: ComponentId, values: &'w [T]) -> Self {
        Self {
            ptr: Some(NonNull::from(values).cast()),
            len: values.len(),
            batch: true,
            type_id: Some(TypeId::of::<T>()),
            component: Some(component),
            mutable: false,
            _marker: PhantomData,
        }
    }

    pub fn from_slice_mut<T: 'static>(component: ComponentId, values: &'w mut [T]) -> Self {
        Self {
            len: values.len(),
            ptr: Some(NonNull::from(values).cast()),
            batch: true,
            type_id: Some(TypeId::of::<T>()),
            component: Some(component),
            mutable: true,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// True when the payload points at a `T` (or a batch of `T`),
    /// whatever its mutability. See [`is_ref`](Self::is_ref) and
    /// [`is_mut`](Self::is_mut) to tell the two apart.
    #[inline]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == Some(TypeId::of::<T>())
    }

    /// Payload is a `T` fetched immutably
    #[inline]
    pub fn is_ref<T: 'static>(&self) -> bool {
        self.is::<T>() && !self.mutable
    }

    /// Payload is a `T` fetched mutably
    #[inline]
    pub fn is_mut<T: 'static>(&self) -> bool {
        self.is::<T>() && self.mutable
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn is_batch(&self) -> bool {
        self.batch
    }

    /// Component that produced the payload
    pub fn component_id(&self) -> Option<ComponentId> {
        self.component
    }

    /// Number of instances behind the payload (0 when null)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn typed_ptr<T: 'static>(&self, batch: bool) -> Option<NonNull<T>> {
        if self.batch != batch || !self.is::<T>() {
            return None;
        }
        self.ptr.map(NonNull::cast)
    }

    pub fn as_ref<T: 'static>(&self) -> Option<&T> {
        let ptr = self.typed_ptr::<T>(false)?;
        // SAFETY: type id checked, pointer borrowed for 'w
        Some(unsafe { ptr.as_ref() })
    }

    /// Mutable cast; `None` unless the payload was fetched mutably
    pub fn as_mut<T: 'static>(&mut self) -> Option<&mut T> {
        if !self.mutable {
            return None;
        }
        let mut ptr = self.typed_ptr::<T>(false)?;
        // SAFETY: built from a `&'w mut T` and borrowed exclusively through self
        Some(unsafe { ptr.as_mut() })
    }

    pub fn as_batch<T: 'static>(&self) -> Option<BatchRef<'_, T>> {
        let ptr = self.typed_ptr::<T>(true)?;
        // SAFETY: built from a `&'w [T]` of `len` elements
        Some(BatchRef::new(unsafe {
            slice::from_raw_parts(ptr.as_ptr(), self.len)
        }))
    }

    pub fn as_batch_mut<T: 'static>(&mut self) -> Option<BatchMut<'_, T>> {
        if !self.mutable {
            return None;
        }
        let ptr = self.typed_ptr::<T>(true)?;
        // SAFETY: built from a `&'w mut [T]` of `len` elements
        Some(BatchMut::new(unsafe {
            slice::from_raw_parts_mut(ptr.as_ptr(), self.len)
        }))
    }

    /// Consume into a reference living as long as the query borrow
    pub fn into_ref<T: 'static>(self) -> Option<&'w T> {
        let ptr = self.typed_ptr::<T>(false)?;
        // SAFETY: type id checked, pointer valid for 'w
        Some(unsafe { &*ptr.as_ptr() })
    }

    pub fn into_mut<T: 'static>(self) -> Option<&'w mut T> {
        if !self.mutable {
            return None;
        }
        let ptr = self.typed_ptr::<T>(false)?;
        // SAFETY: built from a `&'w mut T`, ownership of the borrow moves out
        Some(unsafe { &mut *ptr.as_ptr() })
    }
}

impl Default for JoinData<'_> {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for JoinData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinData")
            .field("component", &self.component)
            .field("mutable", &self.mutable)
            .field("batch", &self.batch)
            .field("len", &self.len)
            .finish()
    }
}
