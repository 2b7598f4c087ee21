// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small rig for tests, benches and the command line tool

use std::f32::consts::TAU;
use std::sync::Arc;

use sever_geometry::{
    BoneMetadata, BoneWeight, InfillMode, MaterialHandle, Matrix4, MeshSnapshot, Point3,
    SnapshotParts, Vector2, Vector3, Vector4, DEFAULT_MAX_TILT_DEGREES,
};

use crate::error::SliceError;
use crate::job::SliceJobSpecification;
use crate::skeleton::{build_node_metadata, resolve_world_transforms, SkeletonNode};
use crate::target::{SceneTarget, TargetId};

pub const RADIUS: f32 = 0.25;
/// Ring heights from the shoulder to the tip
pub const RINGS: [f32; 6] = [0.0, 0.4, 0.8, 1.2, 1.6, 2.0];
pub const BODY_MATERIAL: MaterialHandle = MaterialHandle(0);
pub const INFILL_MATERIAL: MaterialHandle = MaterialHandle(1);

/// An open tube skinned to two bones, with a third bone at its tip
#[derive(Debug, Clone)]
pub struct DemoRig {
    pub skeleton: Vec<SkeletonNode>,
    pub snapshot: MeshSnapshot,
    pub severables: Vec<Arc<str>>,
}

impl DemoRig {
    /// A job cutting the tube at `joint`, capped with [`INFILL_MATERIAL`]
    pub fn specification(
        &self,
        joint: &str,
        progression: f32,
        tilt: Option<Vector3<f32>>,
    ) -> Result<SliceJobSpecification, SliceError> {
        Ok(SliceJobSpecification {
            target: TargetId(0),
            snapshots: vec![self.snapshot.clone()],
            nodes: build_node_metadata(&self.skeleton, joint)?,
            infill_material: Some(INFILL_MATERIAL),
            joint: joint.into(),
            progression,
            tilt,
            max_tilt_degrees: DEFAULT_MAX_TILT_DEGREES,
            infill_mode: InfillMode::Sloppy,
            destroy_original: true,
        })
    }

    pub fn into_target(self, name: &str) -> SceneTarget {
        SceneTarget {
            name: name.to_string(),
            skeleton: self.skeleton,
            snapshots: vec![self.snapshot],
            severables: self.severables,
            infill_material: Some(INFILL_MATERIAL),
            ..SceneTarget::default()
        }
    }
}

/// Build the rig with `segments` vertices per ring.
///
/// The "upper" joint sits at the origin, "lower" at y = 1 and "tip" at
/// y = 2. Rings below y = 1 follow "upper", rings above follow "lower", and
/// the two rings next to the elbow blend between them.
pub fn two_bone_cylinder(segments: usize) -> Result<DemoRig, SliceError> {
    let segments = segments.max(3);

    let mut skeleton = vec![
        SkeletonNode::new("armature", None, Vector3::zeros()),
        SkeletonNode::new("upper", Some("armature"), Vector3::zeros()),
        SkeletonNode::new("lower", Some("upper"), Vector3::new(0.0, 1.0, 0.0)),
        SkeletonNode::new("tip", Some("lower"), Vector3::new(0.0, 1.0, 0.0)),
    ];
    resolve_world_transforms(&mut skeleton)?;

    let bones = vec![
        BoneMetadata::new(0, "upper", Matrix4::identity()),
        BoneMetadata::new(1, "lower", Matrix4::new_translation(&Vector3::new(0.0, -1.0, 0.0))),
        BoneMetadata::new(2, "tip", Matrix4::new_translation(&Vector3::new(0.0, -2.0, 0.0))),
    ];

    let mut parts = SnapshotParts {
        key: 1,
        materials: vec![BODY_MATERIAL],
        bones,
        ..SnapshotParts::default()
    };

    for &y in &RINGS {
        let weight = if y < 0.6 {
            BoneWeight::single(0)
        } else if y < 1.0 {
            BoneWeight::blend(0, 1, 0.3)
        } else if y < 1.4 {
            BoneWeight::blend(0, 1, 0.7)
        } else {
            BoneWeight::single(1)
        };

        for s in 0..segments {
            let angle = TAU * s as f32 / segments as f32;
            let (sin, cos) = angle.sin_cos();
            parts.positions.push(Point3::new(cos * RADIUS, y, sin * RADIUS));
            parts.normals.push(Vector3::new(cos, 0.0, sin));
            parts.uvs.push(Vector2::new(s as f32 / segments as f32, y / 2.0));
            parts.tangents.push(Vector4::new(-sin, 0.0, cos, 1.0));
            parts.bone_weights.push(weight);
        }
    }

    let mut indices = Vec::with_capacity((RINGS.len() - 1) * segments * 6);
    for ring in 0..RINGS.len() - 1 {
        let base = (ring * segments) as u32;
        let next = base + segments as u32;
        for s in 0..segments as u32 {
            let s1 = (s + 1) % segments as u32;
            let (a, b, c, d) = (base + s, base + s1, next + s, next + s1);
            // Counter-clockwise seen from outside the tube.
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }
    parts.submeshes = vec![indices];

    Ok(DemoRig {
        skeleton,
        snapshot: MeshSnapshot::from_parts(parts)?,
        severables: vec!["upper".into(), "lower".into(), "tip".into()],
    })
}
