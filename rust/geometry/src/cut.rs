// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cutting one snapshot into two partitions

use nalgebra::Point3;

use crate::infill::{fill, InfillMode};
use crate::plane::Plane;
use crate::pool::SliceArena;
use crate::retopology::{compact, SubmeshLayout};
use crate::snapshot::{MaterialHandle, MeshSnapshot};
use crate::split::{classify_vertices, split_triangles, BoneRoles, WorkingMesh};
use crate::{Error, Result};

/// Everything a single snapshot cut needs besides the mesh itself
#[derive(Debug, Clone, Copy)]
pub struct CutParameters<'p> {
    /// Plane in mesh space; `None` when the mesh does not contain the cut joint
    pub plane: Option<Plane>,
    /// Per bone index: driven by the cut joint or a descendant
    pub severed_bones: &'p [bool],
    /// Per bone index: the cut joint or its parent
    pub mandatory_bones: &'p [bool],
    pub infill_material: Option<MaterialHandle>,
    pub infill_mode: InfillMode,
}

/// Counters describing one cut
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CutStats {
    pub split_triangles: usize,
    pub boundary_vertices: usize,
    pub infill_triangles: usize,
    pub dropped_loops: usize,
}

/// The two partitions of one snapshot
#[derive(Debug, Clone)]
pub struct CutResult {
    /// The severed side
    pub front: MeshSnapshot,
    pub back: MeshSnapshot,
    pub stats: CutStats,
}

/// Cut `snapshot` into front and back partitions.
///
/// Both partitions are capped only when an infill material is configured.
/// Caps go to the snapshot's infill slot from an earlier cut, or the slot
/// already holding the material; otherwise the material is appended as a
/// new last submesh.
pub fn cut_snapshot(
    snapshot: &MeshSnapshot,
    params: &CutParameters<'_>,
    arena: &SliceArena,
) -> Result<CutResult> {
    let bone_count = snapshot.bones().len();
    if params.severed_bones.len() != bone_count || params.mandatory_bones.len() != bone_count {
        return Err(Error::MissingBone(format!(
            "snapshot {} has {} bones but roles cover {}",
            snapshot.key(),
            bone_count,
            params.severed_bones.len().min(params.mandatory_bones.len())
        )));
    }
    if let Some(plane) = &params.plane {
        if !plane.normal.iter().all(|c| c.is_finite()) || !plane.w.is_finite() {
            return Err(Error::DegeneratePlane(format!("{:?}", plane.coefficients())));
        }
    }

    let roles = BoneRoles {
        severed: params.severed_bones,
        mandatory: params.mandatory_bones,
    };

    let mut sides = arena.sides.get(snapshot.vertex_count());
    let mut values = arena.scalars.get(snapshot.vertex_count());
    classify_vertices(snapshot, params.plane.as_ref(), &roles, &mut sides, &mut values);

    let index_count: usize = snapshot.submeshes().map(<[u32]>::len).sum();
    let mut working = WorkingMesh::from_snapshot(snapshot, index_count, arena);
    let mut split = split_triangles(
        snapshot,
        &sides,
        &values,
        params.plane.is_some(),
        &mut working,
        arena,
    );

    let mut materials = snapshot.materials().to_vec();
    let mut infill_index = snapshot.infill_index().or_else(|| {
        params
            .infill_material
            .and_then(|m| materials.iter().position(|existing| *existing == m))
    });

    let infill = match &params.plane {
        Some(plane) if params.infill_material.is_some() && split.boundary_count > 0 => {
            Some(fill(params.infill_mode, plane, &mut working, &split, arena))
        }
        _ => None,
    };

    let mut stats = CutStats {
        split_triangles: split.split_count,
        boundary_vertices: split.boundary_count,
        ..CutStats::default()
    };

    let mut extra: Option<(&[u32], &[u32])> = None;
    if let Some(infill) = &infill {
        stats.infill_triangles = infill.triangle_count();
        stats.dropped_loops = infill.dropped_loops;
        match infill_index {
            Some(slot) => {
                split.front[slot].extend_from_slice(&infill.front);
                split.back[slot].extend_from_slice(&infill.back);
            }
            None => {
                if let Some(material) = params.infill_material {
                    materials.push(material);
                    infill_index = Some(materials.len() - 1);
                    extra = Some((&infill.front, &infill.back));
                }
            }
        }
    }

    let mut front_lists: Vec<&[u32]> = split.front.iter().map(|l| &l[..]).collect();
    let mut back_lists: Vec<&[u32]> = split.back.iter().map(|l| &l[..]).collect();
    if let Some((front, back)) = extra {
        front_lists.push(front);
        back_lists.push(back);
    }

    let front = compact(
        snapshot,
        &working,
        &SubmeshLayout {
            materials: &materials,
            infill_index,
            submeshes: front_lists,
        },
        arena,
    )?;
    let back = compact(
        snapshot,
        &working,
        &SubmeshLayout {
            materials: &materials,
            infill_index,
            submeshes: back_lists,
        },
        arena,
    )?;

    Ok(CutResult { front, back, stats })
}

/// Mean of the points, or the origin when there are none
pub fn mean_point<'p>(points: impl IntoIterator<Item = &'p Point3<f32>>) -> Point3<f32> {
    let (sum, count) = points
        .into_iter()
        .fold((nalgebra::Vector3::zeros(), 0usize), |(sum, count), p| {
            (sum + p.coords, count + 1)
        });
    if count == 0 {
        Point3::origin()
    } else {
        Point3::from(sum / count as f32)
    }
}
