// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Immutable skinned mesh data
//!
//! A [`MeshSnapshot`] is the value type the cutter works on. All buffers are
//! shared slices, so cloning a snapshot or deriving a new one with a single
//! field replaced never copies vertex data.

use std::sync::Arc;

use nalgebra::{Matrix4, Point3, Vector2, Vector3, Vector4};

use crate::{Error, Result};

/// Influences at or below this weight are ignored when classifying vertices
pub const SIGNIFICANT_WEIGHT: f32 = 0.1;

/// Up to four bone influences for one vertex
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoneWeight {
    pub indices: [u32; 4],
    pub weights: [f32; 4],
}

impl BoneWeight {
    /// A vertex fully bound to one bone
    #[inline]
    pub fn single(bone: u32) -> Self {
        Self {
            indices: [bone, 0, 0, 0],
            weights: [1.0, 0.0, 0.0, 0.0],
        }
    }

    /// Blend between two bones, `weight` going to `second`
    #[inline]
    pub fn blend(first: u32, second: u32, weight: f32) -> Self {
        Self {
            indices: [first, second, 0, 0],
            weights: [1.0 - weight, weight, 0.0, 0.0],
        }
    }

    /// Iterate (bone, weight) pairs with a non-zero weight
    #[inline]
    pub fn influences(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.indices
            .iter()
            .zip(self.weights.iter())
            .filter(|(_, w)| **w > 0.0)
            .map(|(i, w)| (*i, *w))
    }

    /// Iterate bones whose weight exceeds [`SIGNIFICANT_WEIGHT`]
    #[inline]
    pub fn significant(&self) -> impl Iterator<Item = u32> + '_ {
        self.influences()
            .filter(|(_, w)| *w > SIGNIFICANT_WEIGHT)
            .map(|(i, _)| i)
    }

    /// The heaviest influence, if any
    pub fn strongest(&self) -> Option<(u32, f32)> {
        self.influences()
            .fold(None, |best: Option<(u32, f32)>, (i, w)| match best {
                Some((_, bw)) if bw >= w => best,
                _ => Some((i, w)),
            })
    }
}

/// Opaque handle to a render material owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialHandle(pub u32);

/// Bind pose facts for one skinned bone
#[derive(Debug, Clone, PartialEq)]
pub struct BoneMetadata {
    /// Index used by [`BoneWeight::indices`]
    pub index: u32,
    /// Key of the skeleton node driving this bone
    pub name: Arc<str>,
    /// Mesh space to bone space
    pub inverse_bind_pose: Matrix4<f32>,
}

impl BoneMetadata {
    pub fn new(index: u32, name: impl Into<Arc<str>>, inverse_bind_pose: Matrix4<f32>) -> Self {
        Self {
            index,
            name: name.into(),
            inverse_bind_pose,
        }
    }

    /// Bone space to mesh space
    pub fn bone_to_mesh(&self) -> Result<Matrix4<f32>> {
        self.inverse_bind_pose.try_inverse().ok_or_else(|| {
            Error::InvalidSnapshot(format!("bind pose of bone '{}' is singular", self.name))
        })
    }

    /// Origin of the bone in mesh space
    pub fn bind_position(&self) -> Result<Point3<f32>> {
        Ok(self.bone_to_mesh()?.transform_point(&Point3::origin()))
    }
}

/// Owned buffers used to assemble a [`MeshSnapshot`]
#[derive(Debug, Clone, Default)]
pub struct SnapshotParts {
    pub key: u64,
    pub positions: Vec<Point3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub uvs: Vec<Vector2<f32>>,
    /// Either empty or one per vertex
    pub tangents: Vec<Vector4<f32>>,
    pub bone_weights: Vec<BoneWeight>,
    pub materials: Vec<MaterialHandle>,
    pub bones: Vec<BoneMetadata>,
    pub infill_index: Option<usize>,
    /// One triangle list per material slot
    pub submeshes: Vec<Vec<u32>>,
}

/// Immutable per-renderer geometry and skin data
#[derive(Debug, Clone, PartialEq)]
pub struct MeshSnapshot {
    key: u64,
    positions: Arc<[Point3<f32>]>,
    normals: Arc<[Vector3<f32>]>,
    uvs: Arc<[Vector2<f32>]>,
    tangents: Arc<[Vector4<f32>]>,
    bone_weights: Arc<[BoneWeight]>,
    materials: Arc<[MaterialHandle]>,
    bones: Arc<[BoneMetadata]>,
    infill_index: Option<usize>,
    submeshes: Arc<[Arc<[u32]>]>,
}

impl MeshSnapshot {
    /// Validate and freeze a set of buffers
    pub fn from_parts(parts: SnapshotParts) -> Result<Self> {
        let snapshot = Self {
            key: parts.key,
            positions: parts.positions.into(),
            normals: parts.normals.into(),
            uvs: parts.uvs.into(),
            tangents: parts.tangents.into(),
            bone_weights: parts.bone_weights.into(),
            materials: parts.materials.into(),
            bones: parts.bones.into(),
            infill_index: parts.infill_index,
            submeshes: parts
                .submeshes
                .into_iter()
                .map(Arc::<[u32]>::from)
                .collect(),
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    fn validate(&self) -> Result<()> {
        let count = self.positions.len();
        let invalid = |what: String| Err(Error::InvalidSnapshot(what));

        if self.normals.len() != count {
            return invalid(format!("{} normals for {} vertices", self.normals.len(), count));
        }
        if self.uvs.len() != count {
            return invalid(format!("{} uvs for {} vertices", self.uvs.len(), count));
        }
        if !self.tangents.is_empty() && self.tangents.len() != count {
            return invalid(format!("{} tangents for {} vertices", self.tangents.len(), count));
        }
        if self.bone_weights.len() != count {
            return invalid(format!(
                "{} bone weights for {} vertices",
                self.bone_weights.len(),
                count
            ));
        }
        if self.materials.len() != self.submeshes.len() {
            return invalid(format!(
                "{} materials for {} submeshes",
                self.materials.len(),
                self.submeshes.len()
            ));
        }
        if let Some(slot) = self.infill_index {
            if slot >= self.materials.len() {
                return invalid(format!("infill slot {} out of range", slot));
            }
        }
        for (slot, indices) in self.submeshes.iter().enumerate() {
            if indices.len() % 3 != 0 {
                return invalid(format!("submesh {} is not a triangle list", slot));
            }
            if let Some(bad) = indices.iter().find(|i| **i as usize >= count) {
                return invalid(format!("submesh {} references vertex {}", slot, bad));
            }
        }
        for (bone, meta) in self.bones.iter().enumerate() {
            if meta.index as usize != bone {
                return invalid(format!(
                    "bone '{}' stored at {} claims index {}",
                    meta.name, bone, meta.index
                ));
            }
        }
        let bone_count = self.bones.len() as u32;
        if let Some(weight) = self
            .bone_weights
            .iter()
            .find(|w| w.influences().any(|(i, _)| i >= bone_count))
        {
            return invalid(format!("bone weight {:?} references a missing bone", weight));
        }
        Ok(())
    }

    #[inline]
    pub fn key(&self) -> u64 {
        self.key
    }

    #[inline]
    pub fn positions(&self) -> &[Point3<f32>] {
        &self.positions
    }

    #[inline]
    pub fn normals(&self) -> &[Vector3<f32>] {
        &self.normals
    }

    #[inline]
    pub fn uvs(&self) -> &[Vector2<f32>] {
        &self.uvs
    }

    /// Empty when the source mesh carried no tangents
    #[inline]
    pub fn tangents(&self) -> &[Vector4<f32>] {
        &self.tangents
    }

    #[inline]
    pub fn bone_weights(&self) -> &[BoneWeight] {
        &self.bone_weights
    }

    #[inline]
    pub fn materials(&self) -> &[MaterialHandle] {
        &self.materials
    }

    #[inline]
    pub fn bones(&self) -> &[BoneMetadata] {
        &self.bones
    }

    #[inline]
    pub fn infill_index(&self) -> Option<usize> {
        self.infill_index
    }

    #[inline]
    pub fn submeshes(&self) -> impl ExactSizeIterator<Item = &[u32]> + '_ {
        self.submeshes.iter().map(|s| &s[..])
    }

    #[inline]
    pub fn submesh(&self, slot: usize) -> Option<&[u32]> {
        self.submeshes.get(slot).map(|s| &s[..])
    }

    #[inline]
    pub fn submesh_count(&self) -> usize {
        self.submeshes.len()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.submeshes.iter().map(|s| s.len() / 3).sum()
    }

    /// Look up a bone by the node key that drives it
    pub fn bone_by_name(&self, name: &str) -> Option<&BoneMetadata> {
        self.bones.iter().find(|b| &*b.name == name)
    }

    pub fn with_key(&self, key: u64) -> Self {
        Self { key, ..self.clone() }
    }

    pub fn with_materials(&self, materials: Vec<MaterialHandle>) -> Result<Self> {
        let snapshot = Self {
            materials: materials.into(),
            ..self.clone()
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn with_infill_index(&self, infill_index: Option<usize>) -> Result<Self> {
        let snapshot = Self {
            infill_index,
            ..self.clone()
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn with_tangents(&self, tangents: Vec<Vector4<f32>>) -> Result<Self> {
        let snapshot = Self {
            tangents: tangents.into(),
            ..self.clone()
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Copy the buffers back out for editing
    pub fn to_parts(&self) -> SnapshotParts {
        SnapshotParts {
            key: self.key,
            positions: self.positions.to_vec(),
            normals: self.normals.to_vec(),
            uvs: self.uvs.to_vec(),
            tangents: self.tangents.to_vec(),
            bone_weights: self.bone_weights.to_vec(),
            materials: self.materials.to_vec(),
            bones: self.bones.to_vec(),
            infill_index: self.infill_index,
            submeshes: self.submeshes.iter().map(|s| s.to_vec()).collect(),
        }
    }

    /// True when both snapshots share their vertex buffers
    pub fn shares_vertices_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.positions, &other.positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> SnapshotParts {
        SnapshotParts {
            key: 7,
            positions: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            normals: vec![Vector3::z(); 3],
            uvs: vec![Vector2::zeros(); 3],
            tangents: Vec::new(),
            bone_weights: vec![BoneWeight::single(0); 3],
            materials: vec![MaterialHandle(1)],
            bones: vec![BoneMetadata::new(0, "root", Matrix4::identity())],
            infill_index: None,
            submeshes: vec![vec![0, 1, 2]],
        }
    }

    #[test]
    fn test_valid_snapshot() {
        let snapshot = MeshSnapshot::from_parts(triangle()).unwrap();
        assert_eq!(snapshot.vertex_count(), 3);
        assert_eq!(snapshot.triangle_count(), 1);
        assert_eq!(snapshot.bone_by_name("root").map(|b| b.index), Some(0));
    }

    #[test]
    fn test_rejects_mismatched_lengths() {
        let mut parts = triangle();
        parts.normals.pop();
        assert!(matches!(
            MeshSnapshot::from_parts(parts),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_index() {
        let mut parts = triangle();
        parts.submeshes[0][2] = 3;
        assert!(MeshSnapshot::from_parts(parts).is_err());
    }

    #[test]
    fn test_rejects_missing_bone() {
        let mut parts = triangle();
        parts.bone_weights[1] = BoneWeight::blend(0, 4, 0.5);
        assert!(MeshSnapshot::from_parts(parts).is_err());
    }

    #[test]
    fn test_with_replaces_without_copying() {
        let snapshot = MeshSnapshot::from_parts(triangle()).unwrap();
        let retagged = snapshot.with_infill_index(Some(0)).unwrap();
        assert_eq!(retagged.infill_index(), Some(0));
        assert_eq!(snapshot.infill_index(), None);
        assert!(retagged.shares_vertices_with(&snapshot));
        assert!(snapshot.with_infill_index(Some(1)).is_err());
    }

    #[test]
    fn test_strongest_influence() {
        let weight = BoneWeight::blend(2, 3, 0.7);
        assert_eq!(weight.strongest().map(|(i, _)| i), Some(3));
        assert_eq!(weight.significant().count(), 2);
        assert_eq!(BoneWeight::default().strongest(), None);
    }
}
