// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Skeleton hierarchy facts captured per cut request

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use sever_geometry::{mean_point, Matrix4, Point3, UnitQuaternion, Vector3, MAX_PROGRESSION};

use crate::error::SliceError;

/// One node of the host's skeletal hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonNode {
    pub key: Arc<str>,
    /// `None` only for the hierarchy root
    pub parent: Option<Arc<str>>,
    pub local_position: Vector3<f32>,
    pub local_rotation: UnitQuaternion<f32>,
    pub local_scale: Vector3<f32>,
    pub world_to_local: Matrix4<f32>,
    pub active: bool,
}

impl SkeletonNode {
    /// Node with an identity rotation and unit scale. `world_to_local` is left
    /// as identity; see [`resolve_world_transforms`].
    pub fn new(key: &str, parent: Option<&str>, local_position: Vector3<f32>) -> Self {
        Self {
            key: key.into(),
            parent: parent.map(Arc::from),
            local_position,
            local_rotation: UnitQuaternion::identity(),
            local_scale: Vector3::repeat(1.0),
            world_to_local: Matrix4::identity(),
            active: true,
        }
    }

    pub fn local_matrix(&self) -> Matrix4<f32> {
        Matrix4::new_translation(&self.local_position)
            * self.local_rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&self.local_scale)
    }
}

/// Derive every node's `world_to_local` from the local transforms
pub fn resolve_world_transforms(nodes: &mut [SkeletonNode]) -> Result<(), SliceError> {
    let index: FxHashMap<Arc<str>, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.key.clone(), i))
        .collect();
    let mut world: Vec<Option<Matrix4<f32>>> = vec![None; nodes.len()];

    for start in 0..nodes.len() {
        // Walk up to the nearest resolved ancestor, then back down.
        let mut chain = Vec::new();
        let mut cursor = Some(start);
        while let Some(i) = cursor.filter(|i| world[*i].is_none()) {
            if chain.contains(&i) {
                return Err(SliceError::MissingNode(format!(
                    "cycle through '{}'",
                    nodes[i].key
                )));
            }
            chain.push(i);
            cursor = nodes[i].parent.as_ref().and_then(|p| index.get(p).copied());
        }

        for &i in chain.iter().rev() {
            let parent_world = nodes[i]
                .parent
                .as_ref()
                .and_then(|p| index.get(p))
                .and_then(|p| world[*p])
                .unwrap_or_else(Matrix4::identity);
            world[i] = Some(parent_world * nodes[i].local_matrix());
        }
    }

    for (node, world) in nodes.iter_mut().zip(world) {
        let world = world.unwrap_or_else(Matrix4::identity);
        node.world_to_local = world
            .try_inverse()
            .ok_or_else(|| SliceError::SingularTransform(node.key.to_string()))?;
    }
    Ok(())
}

/// Per-node facts frozen for one cut
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMetadata {
    pub key: Arc<str>,
    pub parent: Option<Arc<str>>,
    pub local_position: Vector3<f32>,
    pub local_rotation: UnitQuaternion<f32>,
    pub local_scale: Vector3<f32>,
    pub world_to_local: Matrix4<f32>,
    pub active: bool,
    /// The cut joint or one of its descendants
    pub is_considered_severed: bool,
}

impl NodeMetadata {
    pub fn local_to_world(&self) -> Result<Matrix4<f32>, SliceError> {
        self.world_to_local
            .try_inverse()
            .ok_or_else(|| SliceError::SingularTransform(self.key.to_string()))
    }

    pub fn world_position(&self) -> Result<Point3<f32>, SliceError> {
        Ok(self.local_to_world()?.transform_point(&Point3::origin()))
    }
}

pub type NodeMap = FxHashMap<Arc<str>, NodeMetadata>;

/// Freeze the hierarchy for a cut at `joint`, flood-filling severed status
/// from the joint down to all its descendants.
pub fn build_node_metadata(nodes: &[SkeletonNode], joint: &str) -> Result<NodeMap, SliceError> {
    if !nodes.iter().any(|n| &*n.key == joint) {
        return Err(SliceError::UnknownJoint(joint.to_string()));
    }

    let mut children: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for node in nodes {
        if let Some(parent) = &node.parent {
            children.entry(parent).or_default().push(&node.key);
        }
    }

    let mut severed: FxHashSet<&str> = FxHashSet::default();
    let mut frontier = vec![joint];
    while let Some(key) = frontier.pop() {
        if severed.insert(key) {
            if let Some(kids) = children.get(key) {
                frontier.extend(kids.iter().copied());
            }
        }
    }

    Ok(nodes
        .iter()
        .map(|node| {
            (
                node.key.clone(),
                NodeMetadata {
                    key: node.key.clone(),
                    parent: node.parent.clone(),
                    local_position: node.local_position,
                    local_rotation: node.local_rotation,
                    local_scale: node.local_scale,
                    world_to_local: node.world_to_local,
                    active: node.active,
                    is_considered_severed: severed.contains(&*node.key),
                },
            )
        })
        .collect())
}

/// Joint and progression chosen for a world-space hit
#[derive(Debug, Clone, PartialEq)]
pub struct JointChoice {
    pub joint: Arc<str>,
    pub progression: f32,
}

/// Pick the severable joint to cut for a hit at `point`.
///
/// The nearest severable wins, unless the hit lies between it and a
/// severable parent, in which case the parent is cut further along.
/// Progression is the squared-distance ratio between the joint and the mean
/// of its severable children.
pub fn determine_slice(
    nodes: &[SkeletonNode],
    severables: &[Arc<str>],
    point: &Point3<f32>,
) -> Result<Option<JointChoice>, SliceError> {
    let by_key: FxHashMap<&str, &SkeletonNode> = nodes.iter().map(|n| (&*n.key, n)).collect();

    let mut positions: Vec<(&SkeletonNode, Point3<f32>)> = Vec::with_capacity(severables.len());
    for key in severables {
        let node = by_key
            .get(&**key)
            .copied()
            .ok_or_else(|| SliceError::MissingNode(key.to_string()))?;
        let world = node
            .world_to_local
            .try_inverse()
            .ok_or_else(|| SliceError::SingularTransform(key.to_string()))?;
        positions.push((node, world.transform_point(&Point3::origin())));
    }

    let Some(mut nearest) = (0..positions.len()).min_by(|a, b| {
        let da = (positions[*a].1 - point).norm_squared();
        let db = (positions[*b].1 - point).norm_squared();
        da.total_cmp(&db)
    }) else {
        return Ok(None);
    };

    let parent = positions[nearest].0.parent.as_deref().and_then(|parent| {
        positions.iter().position(|(n, _)| &*n.key == parent)
    });
    if let Some(parent) = parent {
        let here = (positions[nearest].1 - positions[parent].1).norm();
        let touch = (point - positions[parent].1).norm();
        if touch < here {
            nearest = parent;
        }
    }

    let (joint, joint_position) = positions[nearest];
    let children: Vec<Point3<f32>> = positions
        .iter()
        .filter(|(n, _)| n.parent.as_deref() == Some(&*joint.key))
        .map(|(_, p)| *p)
        .collect();

    let progression = if children.is_empty() {
        0.0
    } else {
        let mean_child = mean_point(&children);
        let to_joint = (point - joint_position).norm_squared();
        let to_children = (point - mean_child).norm_squared();
        if to_children > f32::EPSILON {
            (to_joint / to_children).clamp(0.0, MAX_PROGRESSION)
        } else {
            MAX_PROGRESSION
        }
    };

    Ok(Some(JointChoice {
        joint: joint.key.clone(),
        progression,
    }))
}
