// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Slice jobs: what to cut, how it ended, and what it produced

use std::sync::Arc;

use rustc_hash::FxHashMap;
use sever_geometry::{
    CutStats, InfillMode, MaterialHandle, MeshSnapshot, Plane, Point3, Side, Vector3,
};

use crate::error::SliceError;
use crate::skeleton::NodeMap;
use crate::target::TargetId;

pub type JobId = u64;

/// Everything the kernel needs for one cut. Built once per request and
/// never touched by anything but its own job.
#[derive(Debug, Clone)]
pub struct SliceJobSpecification {
    pub target: TargetId,
    /// One snapshot per skinned renderer, in renderer order
    pub snapshots: Vec<MeshSnapshot>,
    pub nodes: NodeMap,
    pub infill_material: Option<MaterialHandle>,
    pub joint: Arc<str>,
    /// Root-tip progression in [0, 1]
    pub progression: f32,
    /// World-space direction the cut should lean toward
    pub tilt: Option<Vector3<f32>>,
    pub max_tilt_degrees: f32,
    pub infill_mode: InfillMode,
    /// Retire the target once the result is applied
    pub destroy_original: bool,
}

impl SliceJobSpecification {
    /// Whether each hierarchy node should stay enabled on the given partition
    pub fn bone_presence(&self, side: Side) -> FxHashMap<Arc<str>, bool> {
        self.nodes
            .iter()
            .map(|(key, node)| {
                let present = match side {
                    Side::Front => node.is_considered_severed,
                    Side::Back => !node.is_considered_severed,
                };
                (key.clone(), present)
            })
            .collect()
    }
}

/// A finished cut
#[derive(Debug, Clone)]
pub struct SliceJobYield {
    pub plane_world: Plane,
    pub focal_world: Point3<f32>,
    /// Severed partitions, aligned with the specification's snapshots
    pub front: Vec<MeshSnapshot>,
    pub back: Vec<MeshSnapshot>,
    pub stats: Vec<CutStats>,
}

impl SliceJobYield {
    pub fn triangle_count(&self) -> usize {
        self.front
            .iter()
            .chain(&self.back)
            .map(MeshSnapshot::triangle_count)
            .sum()
    }
}

/// Where a job stands. Leaves `Pending` exactly once.
#[derive(Debug, Clone, Default)]
pub enum SliceJobState {
    #[default]
    Pending,
    Yielded(Arc<SliceJobYield>),
    Failed(Arc<SliceError>),
}

impl SliceJobState {
    /// Record the kernel outcome.
    ///
    /// # Panics
    ///
    /// If the job already reached a terminal state.
    pub fn resolve(&mut self, outcome: Result<SliceJobYield, SliceError>) {
        assert!(
            matches!(self, SliceJobState::Pending),
            "slice job resolved twice"
        );
        *self = match outcome {
            Ok(result) => SliceJobState::Yielded(Arc::new(result)),
            Err(error) => SliceJobState::Failed(Arc::new(error)),
        };
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        !matches!(self, SliceJobState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_yield() -> SliceJobYield {
        SliceJobYield {
            plane_world: Plane::new(Vector3::y(), -1.0),
            focal_world: Point3::new(0.0, 1.0, 0.0),
            front: Vec::new(),
            back: Vec::new(),
            stats: Vec::new(),
        }
    }

    #[test]
    fn test_state_resolves_once() {
        let mut state = SliceJobState::default();
        assert!(!state.is_done());
        state.resolve(Ok(empty_yield()));
        assert!(state.is_done());
        assert!(matches!(state, SliceJobState::Yielded(_)));
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut state = SliceJobState::Pending;
        state.resolve(Err(SliceError::UnknownJoint("elbow".into())));
        match &state {
            SliceJobState::Failed(error) => {
                assert_eq!(**error, SliceError::UnknownJoint("elbow".into()))
            }
            _ => panic!("Expected failed state"),
        }
    }

    #[test]
    #[should_panic(expected = "resolved twice")]
    fn test_second_resolution_panics() {
        let mut state = SliceJobState::Pending;
        state.resolve(Ok(empty_yield()));
        state.resolve(Ok(empty_yield()));
    }
}
