// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sliceable targets and the hooks a host attaches to them

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use sever_geometry::{InfillMode, MaterialHandle, MeshSnapshot, Point3, Vector3};

use crate::error::SliceError;
use crate::job::{SliceJobSpecification, SliceJobYield};
use crate::skeleton::SkeletonNode;

/// Handle of a registered target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

/// Handle of a host collider attached somewhere under a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildId(pub u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who a cut request is aimed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressee {
    Target(TargetId),
    /// A child that reports hits on behalf of its owning target
    Child(ChildId),
}

/// Host policy: may this joint be severed right now?
pub trait DecisionMaker: Send + Sync {
    fn should_sever(&self, joint: &str) -> bool;
}

impl<F> DecisionMaker for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn should_sever(&self, joint: &str) -> bool {
        self(joint)
    }
}

/// A finished slice, as handed to [`SliceHandler`]s
#[derive(Debug, Clone, Copy)]
pub struct SliceEvent<'a> {
    pub target: TargetId,
    pub specification: &'a SliceJobSpecification,
    pub result: &'a SliceJobYield,
}

/// Receives results on the thread that polls the scheduler
pub trait SliceHandler: Send + Sync {
    fn on_sliced(&self, event: &SliceEvent<'_>);

    fn on_failed(&self, _target: TargetId, _error: &SliceError) {}
}

/// A skinned character or prop that can be cut
#[derive(Clone, Default)]
pub struct SceneTarget {
    pub name: String,
    /// World transforms already resolved
    pub skeleton: Vec<SkeletonNode>,
    /// One per skinned renderer
    pub snapshots: Vec<MeshSnapshot>,
    /// Joints a cut may be placed at
    pub severables: Vec<Arc<str>>,
    pub infill_material: Option<MaterialHandle>,
    pub infill_mode: Option<InfillMode>,
    /// Per-joint override of the tilt cone half-angle
    pub max_tilt_by_joint: FxHashMap<Arc<str>, f32>,
    pub decision_maker: Option<Arc<dyn DecisionMaker>>,
    /// Invoked in order for every result
    pub handlers: Vec<Arc<dyn SliceHandler>>,
}

impl fmt::Debug for SceneTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneTarget")
            .field("name", &self.name)
            .field("nodes", &self.skeleton.len())
            .field("snapshots", &self.snapshots.len())
            .field("severables", &self.severables)
            .field("infill_material", &self.infill_material)
            .field("infill_mode", &self.infill_mode)
            .field("has_decision_maker", &self.decision_maker.is_some())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl SceneTarget {
    pub fn with_handler(mut self, handler: Arc<dyn SliceHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_decision_maker(mut self, decision_maker: Arc<dyn DecisionMaker>) -> Self {
        self.decision_maker = Some(decision_maker);
        self
    }

    pub fn is_severable(&self, joint: &str) -> bool {
        self.severables.iter().any(|s| &**s == joint)
    }
}

/// A retired target keeps only its id, so its meshes can be freed
enum Entry {
    Live(Arc<SceneTarget>),
    Retired,
}

/// Every target the scheduler knows, plus the child back-references that
/// route hits on colliders to their owner
#[derive(Default)]
pub struct TargetRegistry {
    targets: FxHashMap<TargetId, Entry>,
    owners: FxHashMap<ChildId, TargetId>,
    next_id: u64,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, target: SceneTarget) -> TargetId {
        self.next_id += 1;
        let id = TargetId(self.next_id);
        tracing::debug!(target_id = %id, name = %target.name, "registered slice target");
        self.targets.insert(id, Entry::Live(Arc::new(target)));
        id
    }

    /// Route hits on `child` to `owner`. Returns false for an unknown owner.
    pub fn register_child(&mut self, child: ChildId, owner: TargetId) -> bool {
        if !matches!(self.targets.get(&owner), Some(Entry::Live(_))) {
            return false;
        }
        self.owners.insert(child, owner);
        true
    }

    pub fn resolve(&self, addressee: Addressee) -> Option<TargetId> {
        match addressee {
            Addressee::Target(id) => self.targets.contains_key(&id).then_some(id),
            Addressee::Child(child) => self.owners.get(&child).copied(),
        }
    }

    /// The live target behind `id`; `None` once it is retired
    pub fn get(&self, id: TargetId) -> Option<&Arc<SceneTarget>> {
        match self.targets.get(&id) {
            Some(Entry::Live(target)) => Some(target),
            _ => None,
        }
    }

    /// Mark a target as destroyed and release its data. Its children stop
    /// routing hits.
    pub fn retire(&mut self, id: TargetId) {
        if let Some(entry) = self.targets.get_mut(&id) {
            *entry = Entry::Retired;
            self.owners.retain(|_, owner| *owner != id);
            tracing::debug!(target_id = %id, "retired slice target");
        }
    }

    pub fn is_retired(&self, id: TargetId) -> bool {
        matches!(self.targets.get(&id), Some(Entry::Retired))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// A hit reported by the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutRequest {
    pub addressee: Addressee,
    /// World-space contact point
    pub point: Point3<f32>,
    /// Optional world-space direction to tilt the cut toward
    pub normal: Option<Vector3<f32>>,
}

impl CutRequest {
    pub fn at(addressee: Addressee, point: Point3<f32>) -> Self {
        Self {
            addressee,
            point,
            normal: None,
        }
    }

    pub fn tilted(mut self, normal: Vector3<f32>) -> Self {
        self.normal = Some(normal);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_route_to_owner() {
        let mut registry = TargetRegistry::new();
        let id = registry.register(SceneTarget::default());
        assert!(registry.register_child(ChildId(7), id));
        assert!(!registry.register_child(ChildId(8), TargetId(99)));

        assert_eq!(registry.resolve(Addressee::Child(ChildId(7))), Some(id));
        assert_eq!(registry.resolve(Addressee::Child(ChildId(8))), None);
        assert_eq!(registry.resolve(Addressee::Target(id)), Some(id));
        assert_eq!(registry.resolve(Addressee::Target(TargetId(99))), None);
    }

    #[test]
    fn test_retire_drops_children() {
        let mut registry = TargetRegistry::new();
        let id = registry.register(SceneTarget::default());
        registry.register_child(ChildId(1), id);
        registry.retire(id);

        assert!(registry.is_retired(id));
        assert_eq!(registry.resolve(Addressee::Child(ChildId(1))), None);
        assert_eq!(registry.resolve(Addressee::Target(id)), Some(id));
        assert!(!registry.register_child(ChildId(2), id));
    }

    #[test]
    fn test_retire_releases_target() {
        let mut registry = TargetRegistry::new();
        let id = registry.register(SceneTarget::default());
        let target = registry.get(id).unwrap().clone();
        assert_eq!(Arc::strong_count(&target), 2);

        registry.retire(id);
        assert_eq!(Arc::strong_count(&target), 1);
        assert!(registry.get(id).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_closure_decision_maker() {
        let only_lower: Arc<dyn DecisionMaker> = Arc::new(|joint: &str| joint == "lower");
        assert!(only_lower.should_sever("lower"));
        assert!(!only_lower.should_sever("upper"));
    }
}
