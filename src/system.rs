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

//! Access reports consumed by schedulers

use ahash::AHashSet;

use crate::component::ComponentId;

/// Components a system reads, writes and needs change tracking for.
///
/// Filled by `Query::get_components` and `DynamicQuery::get_components`;
/// several queries of one system accumulate into the same report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemExeInfo {
    pub mutable_components: AHashSet<ComponentId>,
    pub immutable_components: AHashSet<ComponentId>,
    pub need_changed: AHashSet<ComponentId>,
}

impl SystemExeInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.mutable_components.is_empty()
            && self.immutable_components.is_empty()
            && self.need_changed.is_empty()
    }

    /// Record one component access
    pub fn add(&mut self, component: ComponentId, mutable: bool) {
        if mutable {
            self.mutable_components.insert(component);
        } else {
            self.immutable_components.insert(component);
        }
    }

    /// Union of both reports
    pub fn merge(&mut self, other: &SystemExeInfo) {
        self.mutable_components
            .extend(other.mutable_components.iter().copied());
        self.immutable_components
            .extend(other.immutable_components.iter().copied());
        self.need_changed.extend(other.need_changed.iter().copied());
    }

    /// Check if this access conflicts with another
    pub fn conflicts_with(&self, other: &SystemExeInfo) -> bool {
        // Both write, or one writes what the other reads
        self.mutable_components.iter().any(|id| {
            other.mutable_components.contains(id) || other.immutable_components.contains(id)
        }) || other
            .mutable_components
            .iter()
            .any(|id| self.immutable_components.contains(id))
    }

    /// Check if two systems can run in parallel
    pub fn can_run_parallel(&self, other: &SystemExeInfo) -> bool {
        !self.conflicts_with(other)
    }

    pub fn clear(&mut self) {
        self.mutable_components.clear();
        self.immutable_components.clear();
        self.need_changed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ComponentId = ComponentId::from_raw(1);
    const B: ComponentId = ComponentId::from_raw(2);

    #[test]
    fn test_write_write_conflicts() {
        let mut info1 = SystemExeInfo::new();
        info1.add(A, true);
        let mut info2 = SystemExeInfo::new();
        info2.add(A, true);

        assert!(info1.conflicts_with(&info2));
    }

    #[test]
    fn test_read_write_conflicts_both_ways() {
        let mut reader = SystemExeInfo::new();
        reader.add(A, false);
        let mut writer = SystemExeInfo::new();
        writer.add(A, true);

        assert!(reader.conflicts_with(&writer));
        assert!(writer.conflicts_with(&reader));
    }

    #[test]
    fn test_shared_reads_run_in_parallel() {
        let mut info1 = SystemExeInfo::new();
        info1.add(A, false);
        info1.add(B, true);
        let mut info2 = SystemExeInfo::new();
        info2.add(A, false);

        assert!(info1.can_run_parallel(&info2));
    }

    #[test]
    fn test_merge_and_clear() {
        let mut info = SystemExeInfo::new();
        info.add(A, false);
        let mut other = SystemExeInfo::new();
        other.add(B, true);
        other.need_changed.insert(B);

        info.merge(&other);
        assert!(info.immutable_components.contains(&A));
        assert!(info.mutable_components.contains(&B));
        assert!(info.need_changed.contains(&B));

        info.clear();
        assert!(info.is_empty());
    }
}
