// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Vertex classification and triangle splitting
//!
//! Every vertex is assigned to the front (severed) or back partition, either
//! from its skin weights alone or by testing it against the plane. Triangles
//! whose vertices agree are copied whole. The rest are cut along the plane:
//! each crossing edge gets one boundary vertex, shared by both partitions and
//! by the neighbouring triangle on the other side of that edge.

use nalgebra::{Point3, Vector2, Vector3};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::plane::{Plane, Side};
use crate::pool::{Pooled, SliceArena};
use crate::snapshot::{BoneWeight, MeshSnapshot};

/// Oversized vertex buffers a cut appends to.
///
/// The first `origin_count` entries are the source vertices, in order.
pub struct WorkingMesh<'a> {
    pub positions: Pooled<'a, Vec<Point3<f32>>>,
    pub normals: Pooled<'a, Vec<Vector3<f32>>>,
    pub uvs: Pooled<'a, Vec<Vector2<f32>>>,
    pub weights: Pooled<'a, Vec<BoneWeight>>,
    pub origin_count: usize,
}

impl<'a> WorkingMesh<'a> {
    /// Copy the source vertices into buffers with room for `extra` more
    pub fn from_snapshot(snapshot: &MeshSnapshot, extra: usize, arena: &'a SliceArena) -> Self {
        let capacity = snapshot.vertex_count() + extra;
        let mut working = Self {
            positions: arena.points.get(capacity),
            normals: arena.vectors.get(capacity),
            uvs: arena.uvs.get(capacity),
            weights: arena.weights.get(capacity),
            origin_count: snapshot.vertex_count(),
        };
        working.positions.extend_from_slice(snapshot.positions());
        working.normals.extend_from_slice(snapshot.normals());
        working.uvs.extend_from_slice(snapshot.uvs());
        working.weights.extend_from_slice(snapshot.bone_weights());
        working
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Append a vertex and return its index
    #[inline]
    pub fn push(
        &mut self,
        position: Point3<f32>,
        normal: Vector3<f32>,
        uv: Vector2<f32>,
        weight: BoneWeight,
    ) -> u32 {
        let index = self.positions.len() as u32;
        self.positions.push(position);
        self.normals.push(normal);
        self.uvs.push(uv);
        self.weights.push(weight);
        index
    }
}

/// Per-bone facts that decide how a vertex is classified
#[derive(Debug, Clone, Copy)]
pub struct BoneRoles<'p> {
    /// Bone is driven by the cut joint or one of its descendants
    pub severed: &'p [bool],
    /// Bone is the cut joint or its parent
    pub mandatory: &'p [bool],
}

impl BoneRoles<'_> {
    #[inline]
    fn is_severed(&self, bone: u32) -> bool {
        self.severed.get(bone as usize).copied().unwrap_or(false)
    }

    #[inline]
    fn is_mandatory(&self, bone: u32) -> bool {
        self.mandatory.get(bone as usize).copied().unwrap_or(false)
    }

    /// Which partition a vertex falls in when its weights alone decide it,
    /// or `None` when it must be tested against the plane
    pub fn presort(&self, weight: &BoneWeight, slicing: bool) -> Option<Side> {
        let mut any = false;
        let mut wholly = true;
        let mut severable = false;
        let mut mandatory = false;

        for bone in weight.significant() {
            any = true;
            let severed = self.is_severed(bone);
            wholly &= severed;
            severable |= severed;
            mandatory |= self.is_mandatory(bone);
        }
        let wholly = any && wholly;

        if mandatory && slicing {
            None
        } else if wholly {
            Some(Side::Front)
        } else if severable && slicing {
            None
        } else {
            Some(Side::Back)
        }
    }
}

/// Classify every source vertex.
///
/// `values` receives a signed distance whose sign always agrees with the
/// side: vertices forced to a side by their weights are clamped to zero
/// when the plane disagrees, so interpolation along a crossing edge stays
/// inside the edge.
pub fn classify_vertices(
    snapshot: &MeshSnapshot,
    plane: Option<&Plane>,
    roles: &BoneRoles<'_>,
    sides: &mut Vec<Side>,
    values: &mut Vec<f32>,
) {
    sides.clear();
    values.clear();

    for (position, weight) in snapshot.positions().iter().zip(snapshot.bone_weights()) {
        let distance = plane.map_or(0.0, |p| p.signed_distance(position));
        let side = match roles.presort(weight, plane.is_some()) {
            Some(side) => side,
            None => plane.map_or(Side::Back, |p| p.side(position)),
        };
        sides.push(side);
        values.push(match side {
            Side::Front => distance.max(0.0),
            Side::Back => distance.min(0.0),
        });
    }
}

/// Index lists produced by [`split_triangles`]
pub struct SplitOutput<'a> {
    /// Front triangles, one list per submesh
    pub front: Vec<Pooled<'a, Vec<u32>>>,
    /// Back triangles, one list per submesh
    pub back: Vec<Pooled<'a, Vec<u32>>>,
    /// Boundary vertices in pairs; entries `2k` and `2k + 1` came from the same triangle
    pub intersections: Pooled<'a, Vec<u32>>,
    /// Boundary vertices appended to the working mesh, starting at its origin count
    pub boundary_count: usize,
    pub split_count: usize,
}

/// Partition every triangle of `snapshot`.
///
/// When `slicing` is false the mesh does not contain the cut joint; triangles
/// whose vertices disagree are then kept whole on the back side.
pub fn split_triangles<'a>(
    snapshot: &MeshSnapshot,
    sides: &[Side],
    values: &[f32],
    slicing: bool,
    working: &mut WorkingMesh<'a>,
    arena: &'a SliceArena,
) -> SplitOutput<'a> {
    let mut edges = arena.edges.get(64);
    let mut front = Vec::with_capacity(snapshot.submesh_count());
    let mut back = Vec::with_capacity(snapshot.submesh_count());
    let mut intersections = arena.indices.get(64);
    let mut split_count = 0;

    for indices in snapshot.submeshes() {
        let mut front_list = arena.indices.get(indices.len() + indices.len() / 2);
        let mut back_list = arena.indices.get(indices.len() + indices.len() / 2);

        for triangle in indices.chunks_exact(3) {
            let s = [
                sides[triangle[0] as usize],
                sides[triangle[1] as usize],
                sides[triangle[2] as usize],
            ];

            if s[0] == s[1] && s[1] == s[2] {
                match s[0] {
                    Side::Front => front_list.extend_from_slice(triangle),
                    Side::Back => back_list.extend_from_slice(triangle),
                }
                continue;
            }

            if !slicing {
                back_list.extend_from_slice(triangle);
                continue;
            }

            split_count += 1;

            let mut front_shape: SmallVec<[u32; 4]> = SmallVec::new();
            let mut back_shape: SmallVec<[u32; 4]> = SmallVec::new();
            let mut cuts: SmallVec<[u32; 2]> = SmallVec::new();

            let mut a = 2;
            for b in 0..3 {
                let (ia, ib) = (triangle[a], triangle[b]);
                if s[a] != s[b] {
                    let cut = cut_edge(working, &mut edges, sides, values, ia, ib);
                    front_shape.push(cut);
                    back_shape.push(cut);
                    cuts.push(cut);
                }
                match s[b] {
                    Side::Front => front_shape.push(ib),
                    Side::Back => back_shape.push(ib),
                }
                a = b;
            }

            emit_shape(&front_shape, &mut front_list);
            emit_shape(&back_shape, &mut back_list);

            if let [first, second] = cuts[..] {
                intersections.push(first);
                intersections.push(second);
            }
        }

        front.push(front_list);
        back.push(back_list);
    }

    let boundary_count = working.len() - working.origin_count;
    tracing::debug!(
        key = snapshot.key(),
        split_triangles = split_count,
        boundary_vertices = boundary_count,
        "split mesh"
    );

    SplitOutput {
        front,
        back,
        intersections,
        boundary_count,
        split_count,
    }
}

/// Boundary vertex for the edge `a`-`b`, shared by every triangle using that edge
fn cut_edge(
    working: &mut WorkingMesh<'_>,
    edges: &mut FxHashMap<(u32, u32), u32>,
    sides: &[Side],
    values: &[f32],
    a: u32,
    b: u32,
) -> u32 {
    // Always interpolate from the lower index so both triangles agree bit for bit.
    let key = if a < b { (a, b) } else { (b, a) };
    if let Some(&index) = edges.get(&key) {
        return index;
    }

    let (p, q) = (key.0 as usize, key.1 as usize);
    let (dp, dq) = (values[p], values[q]);
    let denominator = dp - dq;
    let t = if denominator.abs() > f32::EPSILON {
        (dp / denominator).clamp(0.0, 1.0)
    } else {
        0.5
    };

    let position = working.positions[p] + (working.positions[q] - working.positions[p]) * t;
    let blended = working.normals[p].lerp(&working.normals[q], t);
    let normal = blended
        .try_normalize(f32::EPSILON)
        .unwrap_or(working.normals[p]);
    let uv = working.uvs[p].lerp(&working.uvs[q], t);
    let weight = match sides[p] {
        Side::Front => working.weights[p],
        Side::Back => working.weights[q],
    };

    let index = working.push(position, normal, uv, weight);
    edges.insert(key, index);
    index
}

/// Append a split piece as triangles, preserving winding
#[inline]
fn emit_shape(shape: &[u32], out: &mut Vec<u32>) {
    match *shape {
        [a, b, c] => out.extend_from_slice(&[a, b, c]),
        [a, b, c, d] => out.extend_from_slice(&[a, b, d, b, c, d]),
        _ => tracing::debug!(vertices = shape.len(), "skipping split piece"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{BoneMetadata, MaterialHandle, SnapshotParts};
    use approx::assert_relative_eq;
    use nalgebra::Matrix4;

    /// Strip of two triangles sharing the edge 1-2, crossing y = 0.5
    fn strip(weights: Vec<BoneWeight>) -> MeshSnapshot {
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
        ];
        MeshSnapshot::from_parts(SnapshotParts {
            key: 1,
            uvs: positions.iter().map(|p| Vector2::new(p.x, p.y)).collect(),
            normals: vec![Vector3::z(); 4],
            positions,
            tangents: Vec::new(),
            bone_weights: weights,
            materials: vec![MaterialHandle(0)],
            bones: vec![
                BoneMetadata::new(0, "upper", Matrix4::identity()),
                BoneMetadata::new(1, "lower", Matrix4::identity()),
            ],
            infill_index: None,
            submeshes: vec![vec![0, 1, 2, 1, 3, 2]],
        })
        .unwrap()
    }

    fn plane() -> Plane {
        Plane::from_point_normal(&Point3::new(0.0, 0.5, 0.0), &Vector3::y()).unwrap()
    }

    const SEVERED: [bool; 2] = [false, true];
    const MANDATORY: [bool; 2] = [true, true];

    fn roles() -> BoneRoles<'static> {
        BoneRoles {
            severed: &SEVERED,
            mandatory: &MANDATORY,
        }
    }

    fn run(
        snapshot: &MeshSnapshot,
        plane: Option<&Plane>,
    ) -> (Vec<Vec<u32>>, Vec<Vec<u32>>, Vec<u32>, usize) {
        let arena = SliceArena::default();
        let mut sides = Vec::new();
        let mut values = Vec::new();
        classify_vertices(snapshot, plane, &roles(), &mut sides, &mut values);
        let mut working = WorkingMesh::from_snapshot(snapshot, 8, &arena);
        let output = split_triangles(
            snapshot,
            &sides,
            &values,
            plane.is_some(),
            &mut working,
            &arena,
        );
        (
            output.front.iter().map(|l| l.to_vec()).collect(),
            output.back.iter().map(|l| l.to_vec()).collect(),
            output.intersections.to_vec(),
            output.boundary_count,
        )
    }

    #[test]
    fn test_presort() {
        let roles = roles();
        assert_eq!(roles.presort(&BoneWeight::single(1), true), None);
        assert_eq!(roles.presort(&BoneWeight::single(0), false), Some(Side::Back));
        assert_eq!(roles.presort(&BoneWeight::default(), true), Some(Side::Back));

        let only_severed = BoneRoles {
            severed: &SEVERED,
            mandatory: &[false, false],
        };
        assert_eq!(only_severed.presort(&BoneWeight::single(1), true), Some(Side::Front));
        assert_eq!(only_severed.presort(&BoneWeight::blend(0, 1, 0.5), true), None);
        assert_eq!(only_severed.presort(&BoneWeight::blend(0, 1, 0.05), true), Some(Side::Back));
        assert_eq!(only_severed.presort(&BoneWeight::blend(0, 1, 0.5), false), Some(Side::Back));
    }

    #[test]
    fn test_same_side_triangles_are_copied() {
        let snapshot = strip(vec![BoneWeight::single(1); 4]);
        let moved = Plane::from_point_normal(&Point3::new(0.0, -1.0, 0.0), &Vector3::y()).unwrap();
        let (front, back, intersections, created) = run(&snapshot, Some(&moved));
        assert_eq!(front[0], vec![0, 1, 2, 1, 3, 2]);
        assert!(back[0].is_empty());
        assert!(intersections.is_empty());
        assert_eq!(created, 0);
    }

    #[test]
    fn test_split_pattern() {
        let snapshot = strip(vec![BoneWeight::blend(0, 1, 0.5); 4]);
        let (front, back, intersections, created) = run(&snapshot, Some(&plane()));

        // Three crossing edges: 0-2, 1-2 (shared) and 1-3.
        assert_eq!(created, 3);
        assert_eq!(intersections.len(), 4);

        // Triangle 0-1-2 has one vertex in front: a triangle there, a quad behind.
        // Triangle 1-3-2 has two vertices in front: a quad there, a triangle behind.
        assert_eq!(front[0].len(), 3 + 6);
        assert_eq!(back[0].len(), 6 + 3);
    }

    #[test]
    fn test_shared_edge_produces_one_vertex() {
        let snapshot = strip(vec![BoneWeight::blend(0, 1, 0.5); 4]);
        let arena = SliceArena::default();
        let mut sides = Vec::new();
        let mut values = Vec::new();
        classify_vertices(&snapshot, Some(&plane()), &roles(), &mut sides, &mut values);
        let mut working = WorkingMesh::from_snapshot(&snapshot, 8, &arena);
        let output = split_triangles(&snapshot, &sides, &values, true, &mut working, &arena);

        // The shared cut appears in both triangles' intersection pairs.
        let shared: Vec<u32> = output.intersections[..2]
            .iter()
            .filter(|i| output.intersections[2..].contains(i))
            .copied()
            .collect();
        assert_eq!(shared.len(), 1);

        let vertex = working.positions[shared[0] as usize];
        assert_relative_eq!(vertex, Point3::new(0.5, 0.5, 0.0), epsilon = 1e-6);
        for index in working.origin_count..working.len() {
            assert_relative_eq!(working.positions[index].y, 0.5, epsilon = 1e-6);
            assert_eq!(working.weights[index], BoneWeight::blend(0, 1, 0.5));
        }
    }

    #[test]
    fn test_unsliced_mesh_keeps_mixed_triangles_behind() {
        let mut weights = vec![BoneWeight::single(0); 4];
        weights[3] = BoneWeight::single(1);
        let snapshot = strip(weights);

        let arena = SliceArena::default();
        let mut sides = Vec::new();
        let mut values = Vec::new();
        let only_severed = BoneRoles {
            severed: &SEVERED,
            mandatory: &[false, false],
        };
        classify_vertices(&snapshot, None, &only_severed, &mut sides, &mut values);
        assert_eq!(sides, vec![Side::Back, Side::Back, Side::Back, Side::Front]);

        let mut working = WorkingMesh::from_snapshot(&snapshot, 0, &arena);
        let output = split_triangles(&snapshot, &sides, &values, false, &mut working, &arena);
        assert!(output.front[0].is_empty());
        assert_eq!(output.back[0].to_vec(), vec![0, 1, 2, 1, 3, 2]);
        assert_eq!(output.boundary_count, 0);
    }

    #[test]
    fn test_quad_keeps_winding() {
        let mut out = Vec::new();
        emit_shape(&[10, 11, 12, 13], &mut out);
        assert_eq!(out, vec![10, 11, 13, 11, 12, 13]);
        emit_shape(&[1, 2], &mut out);
        assert_eq!(out.len(), 6);
    }
}
