// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The slice kernel: one job in, one yield out
//!
//! Runs on whichever thread the scheduler picks. It reads only its own
//! specification and checks scratch buffers out of the shared arena.

use std::time::Instant;

use sever_geometry::{
    cut_snapshot, mean_point, solve_plane, CutParameters, MeshSnapshot, PlaneAnchors, Point3,
    SliceArena, SolvedPlane,
};

use crate::error::SliceError;
use crate::job::{SliceJobSpecification, SliceJobYield};
use crate::skeleton::NodeMetadata;

/// Cut every snapshot of `spec` and solve the world-space plane
pub fn slice(
    spec: &SliceJobSpecification,
    arena: &SliceArena,
) -> Result<SliceJobYield, SliceError> {
    let start = Instant::now();
    let joint = spec
        .nodes
        .get(&spec.joint)
        .ok_or_else(|| SliceError::UnknownJoint(spec.joint.to_string()))?;

    let mut front = Vec::with_capacity(spec.snapshots.len());
    let mut back = Vec::with_capacity(spec.snapshots.len());
    let mut stats = Vec::with_capacity(spec.snapshots.len());

    for snapshot in &spec.snapshots {
        let result = cut_one(spec, joint, snapshot, arena)?;
        front.push(result.front);
        back.push(result.back);
        stats.push(result.stats);
    }

    let world = solve_world_plane(spec, joint)?;

    tracing::debug!(
        joint = %spec.joint,
        snapshots = spec.snapshots.len(),
        split_triangles = stats.iter().map(|s| s.split_triangles).sum::<usize>(),
        infill_triangles = stats.iter().map(|s| s.infill_triangles).sum::<usize>(),
        time_ms = start.elapsed().as_millis() as u64,
        "slice kernel finished"
    );

    Ok(SliceJobYield {
        plane_world: world.plane,
        focal_world: world.focal,
        front,
        back,
        stats,
    })
}

fn cut_one(
    spec: &SliceJobSpecification,
    joint: &NodeMetadata,
    snapshot: &MeshSnapshot,
    arena: &SliceArena,
) -> Result<sever_geometry::CutResult, SliceError> {
    let bones = snapshot.bones();

    let severed: Vec<bool> = bones
        .iter()
        .map(|b| spec.nodes.get(&b.name).is_some_and(|n| n.is_considered_severed))
        .collect();

    let joint_bone = snapshot.bone_by_name(&joint.key);
    let parent_bone = joint
        .parent
        .as_deref()
        .and_then(|parent| snapshot.bone_by_name(parent));

    let mut mandatory = vec![false; bones.len()];
    for bone in joint_bone.iter().chain(parent_bone.iter()) {
        mandatory[bone.index as usize] = true;
    }

    let plane = match joint_bone {
        Some(joint_bone) => {
            let joint_position = joint_bone.bind_position()?;
            let parent_position = match parent_bone {
                Some(parent) => parent.bind_position()?,
                None => Point3::origin(),
            };

            let mut children = Vec::new();
            if spec.progression > 0.0 {
                for bone in bones {
                    let is_child = spec
                        .nodes
                        .get(&bone.name)
                        .is_some_and(|n| n.parent.as_deref() == Some(&*joint.key));
                    if is_child {
                        children.push(bone.bind_position()?);
                    }
                }
            }

            let tilt = spec.tilt.map(|world| {
                let local = joint.world_to_local.transform_vector(&world);
                joint_bone
                    .bone_to_mesh()
                    .map(|m| m.transform_vector(&local))
            });
            let tilt = tilt.transpose()?;

            let solved = solve_plane(
                &PlaneAnchors {
                    joint: joint_position,
                    parent: parent_position,
                    mean_child: mean_point(&children),
                },
                spec.progression,
                tilt.as_ref(),
                spec.max_tilt_degrees,
            )?;
            Some(solved.plane)
        }
        None => None,
    };

    Ok(cut_snapshot(
        snapshot,
        &CutParameters {
            plane,
            severed_bones: &severed,
            mandatory_bones: &mandatory,
            infill_material: spec.infill_material,
            infill_mode: spec.infill_mode,
        },
        arena,
    )?)
}

/// The cut plane from the hierarchy's world transforms rather than a mesh's
/// bind pose. A joint without a parent node is cut across its local up axis.
pub fn solve_world_plane(
    spec: &SliceJobSpecification,
    joint: &NodeMetadata,
) -> Result<SolvedPlane, SliceError> {
    let joint_to_world = joint.local_to_world()?;
    let joint_position = joint_to_world.transform_point(&Point3::origin());

    let parent_position = match joint.parent.as_ref().and_then(|p| spec.nodes.get(p)) {
        Some(parent) => parent.world_position()?,
        None => joint_to_world.transform_point(&Point3::new(0.0, -1.0, 0.0)),
    };

    let mean_local = if spec.progression > 0.0 {
        let children: Vec<Point3<f32>> = spec
            .nodes
            .values()
            .filter(|n| n.parent.as_deref() == Some(&*joint.key))
            .map(|n| Point3::from(n.local_position))
            .collect();
        mean_point(&children)
    } else {
        Point3::origin()
    };

    Ok(solve_plane(
        &PlaneAnchors {
            joint: joint_position,
            parent: parent_position,
            mean_child: joint_to_world.transform_point(&mean_local),
        },
        spec.progression,
        spec.tilt.as_ref(),
        spec.max_tilt_degrees,
    )?)
}
