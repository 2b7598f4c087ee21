// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compacting working buffers into a finished snapshot
//!
//! A working mesh holds every source vertex plus everything a cut appended,
//! but each partition references only part of it. Compaction keeps the
//! referenced vertices in order of first use and rewrites the index lists.
//! Source vertices keep their tangents; vertices the cut created get tangents
//! derived from their triangles' UV layout.

use nalgebra::{Point3, Vector2, Vector3, Vector4};

use crate::pool::SliceArena;
use crate::snapshot::{MaterialHandle, MeshSnapshot, SnapshotParts};
use crate::split::WorkingMesh;
use crate::Result;

/// Triangles with an edge shorter than this (squared) add no tangent
const DEGENERATE_EDGE: f32 = 1.0 / 65536.0;

const UNMAPPED: u32 = u32::MAX;

/// Material layout of a compacted snapshot
pub struct SubmeshLayout<'l> {
    pub materials: &'l [MaterialHandle],
    pub infill_index: Option<usize>,
    /// One index list per material, into the working mesh
    pub submeshes: Vec<&'l [u32]>,
}

/// Keep only the vertices `layout` references.
///
/// `source` supplies the key, bones and source tangents. If it has no
/// tangents the result has none either.
pub fn compact(
    source: &MeshSnapshot,
    working: &WorkingMesh<'_>,
    layout: &SubmeshLayout<'_>,
    arena: &SliceArena,
) -> Result<MeshSnapshot> {
    let mut remap = arena.indices.get(working.len());
    remap.resize(working.len(), UNMAPPED);
    let mut order = arena.indices.get(working.len());

    let submeshes: Vec<Vec<u32>> = layout
        .submeshes
        .iter()
        .map(|indices| {
            indices
                .iter()
                .map(|&index| {
                    let slot = &mut remap[index as usize];
                    if *slot == UNMAPPED {
                        *slot = order.len() as u32;
                        order.push(index);
                    }
                    *slot
                })
                .collect()
        })
        .collect();

    let pick = |i: &u32| *i as usize;
    let positions: Vec<Point3<f32>> = order.iter().map(|i| working.positions[pick(i)]).collect();
    let normals: Vec<Vector3<f32>> = order.iter().map(|i| working.normals[pick(i)]).collect();
    let uvs: Vec<Vector2<f32>> = order.iter().map(|i| working.uvs[pick(i)]).collect();
    let bone_weights = order.iter().map(|i| working.weights[pick(i)]).collect();

    let tangents = if source.tangents().is_empty() {
        Vec::new()
    } else {
        let mut fresh = arena.flags.get(order.len());
        fresh.extend(order.iter().map(|i| pick(i) >= working.origin_count));

        let mut tangents = vec![Vector4::zeros(); order.len()];
        for (tangent, index) in tangents.iter_mut().zip(order.iter()) {
            if let Some(original) = source.tangents().get(pick(index)) {
                *tangent = *original;
            }
        }
        if fresh.iter().any(|f| *f) {
            let triangles = submeshes.iter().flat_map(|s| s.chunks_exact(3));
            generate_tangents(&positions, &normals, &uvs, triangles, &fresh, &mut tangents, arena);
        }
        tangents
    };

    MeshSnapshot::from_parts(SnapshotParts {
        key: source.key(),
        positions,
        normals,
        uvs,
        tangents,
        bone_weights,
        materials: layout.materials.to_vec(),
        bones: source.bones().to_vec(),
        infill_index: layout.infill_index,
        submeshes,
    })
}

/// Overwrite the tangents of every `fresh` vertex from the triangles using it.
///
/// Contributions are accumulated per triangle from its UV derivatives, then
/// each tangent is orthogonalized against the vertex normal. The `w`
/// component carries handedness.
pub fn generate_tangents<'t>(
    positions: &[Point3<f32>],
    normals: &[Vector3<f32>],
    uvs: &[Vector2<f32>],
    triangles: impl Iterator<Item = &'t [u32]>,
    fresh: &[bool],
    tangents: &mut [Vector4<f32>],
    arena: &SliceArena,
) {
    let mut tan1 = arena.vectors.get(positions.len());
    let mut tan2 = arena.vectors.get(positions.len());
    tan1.resize(positions.len(), Vector3::zeros());
    tan2.resize(positions.len(), Vector3::zeros());

    for triangle in triangles {
        let [i1, i2, i3] = [triangle[0] as usize, triangle[1] as usize, triangle[2] as usize];
        if !(fresh[i1] || fresh[i2] || fresh[i3]) {
            continue;
        }

        let (v1, v2, v3) = (positions[i1], positions[i2], positions[i3]);
        let e1 = v2 - v1;
        let e2 = v3 - v1;
        if e1.norm_squared() <= DEGENERATE_EDGE
            || e2.norm_squared() <= DEGENERATE_EDGE
            || (v3 - v2).norm_squared() <= DEGENERATE_EDGE
        {
            continue;
        }

        let (w1, w2, w3) = (uvs[i1], uvs[i2], uvs[i3]);
        let (s1, s2) = (w2.x - w1.x, w3.x - w1.x);
        let (t1, t2) = (w2.y - w1.y, w3.y - w1.y);
        let det = s1 * t2 - s2 * t1;
        if det.abs() <= f32::EPSILON {
            continue;
        }
        let r = 1.0 / det;

        let sdir = (e1 * t2 - e2 * t1) * r;
        let tdir = (e2 * s1 - e1 * s2) * r;

        for i in [i1, i2, i3] {
            tan1[i] += sdir;
            tan2[i] += tdir;
        }
    }

    for (i, tangent) in tangents.iter_mut().enumerate() {
        if !fresh[i] {
            continue;
        }
        let n = normals[i];
        let t = tan1[i];
        let orthogonal = (t - n * n.dot(&t))
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| fallback_tangent(&n));
        let w = if n.cross(&t).dot(&tan2[i]) < 0.0 { -1.0 } else { 1.0 };
        *tangent = Vector4::new(orthogonal.x, orthogonal.y, orthogonal.z, w);
    }
}

/// Any unit vector perpendicular to `n`, for vertices no triangle could orient
fn fallback_tangent(n: &Vector3<f32>) -> Vector3<f32> {
    let helper = if n.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    (helper - n * n.dot(&helper))
        .try_normalize(f32::EPSILON)
        .unwrap_or_else(Vector3::x)
}
