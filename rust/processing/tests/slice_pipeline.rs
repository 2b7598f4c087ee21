// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end cuts through the demo tube

use approx::assert_relative_eq;
use rustc_hash::FxHashMap;
use sever_geometry::{InfillMode, MeshSnapshot, Point3, Side, SliceArena};
use sever_processing::demo::{self, INFILL_MATERIAL, RADIUS};
use sever_processing::kernel::slice;

const SEGMENTS: usize = 16;

type Edge = ((i64, i64, i64), (i64, i64, i64));

fn quantize(p: &Point3<f32>) -> (i64, i64, i64) {
    let q = |v: f32| (v * 1e4).round() as i64;
    (q(p.x), q(p.y), q(p.z))
}

/// Undirected edges used by exactly one triangle of `indices`
fn open_edges(snapshot: &MeshSnapshot, indices: &[u32]) -> Vec<Edge> {
    let positions = snapshot.positions();
    let mut uses: FxHashMap<Edge, usize> = FxHashMap::default();
    for triangle in indices.chunks_exact(3) {
        for k in 0..3 {
            let a = quantize(&positions[triangle[k] as usize]);
            let b = quantize(&positions[triangle[(k + 1) % 3] as usize]);
            let key = if a < b { (a, b) } else { (b, a) };
            *uses.entry(key).or_default() += 1;
        }
    }
    let mut edges: Vec<Edge> = uses
        .into_iter()
        .filter(|(_, count)| *count == 1)
        .map(|(edge, _)| edge)
        .collect();
    edges.sort_unstable();
    edges
}

fn on_cut(edge: &Edge) -> bool {
    let near = |y: i64| (y - 10_000).abs() <= 1;
    near(edge.0 .1) && near(edge.1 .1)
}

fn cap_normals_y(snapshot: &MeshSnapshot, slot: usize) -> Vec<f32> {
    let positions = snapshot.positions();
    snapshot
        .submesh(slot)
        .unwrap_or(&[])
        .chunks_exact(3)
        .map(|t| {
            let (a, b, c) = (
                positions[t[0] as usize],
                positions[t[1] as usize],
                positions[t[2] as usize],
            );
            (b - a).cross(&(c - a)).y
        })
        .collect()
}

fn cap_area(snapshot: &MeshSnapshot, slot: usize) -> f32 {
    let positions = snapshot.positions();
    snapshot
        .submesh(slot)
        .unwrap_or(&[])
        .chunks_exact(3)
        .map(|t| {
            let (a, b, c) = (
                positions[t[0] as usize],
                positions[t[1] as usize],
                positions[t[2] as usize],
            );
            0.5 * (b - a).cross(&(c - a)).norm()
        })
        .sum()
}

#[test]
fn sloppy_cut_closes_the_silhouette() {
    let rig = demo::two_bone_cylinder(SEGMENTS).unwrap();
    let spec = rig.specification("lower", 0.0, None).unwrap();
    let result = slice(&spec, &SliceArena::default()).unwrap();

    assert_eq!(result.stats[0].split_triangles, 2 * SEGMENTS);
    assert_eq!(result.stats[0].boundary_vertices, 2 * SEGMENTS);
    assert_eq!(result.stats[0].dropped_loops, 0);

    for part in [&result.front[0], &result.back[0]] {
        assert_eq!(part.materials(), &[demo::BODY_MATERIAL, INFILL_MATERIAL]);
        assert_eq!(part.infill_index(), Some(1));

        let body = part.submesh(0).unwrap();
        let cap = part.submesh(1).unwrap();
        assert!(!cap.is_empty());

        let body_rim: Vec<Edge> = open_edges(part, body).into_iter().filter(on_cut).collect();
        let cap_rim = open_edges(part, cap);
        assert_eq!(body_rim.len(), 2 * SEGMENTS);
        assert_eq!(body_rim, cap_rim);
    }

    let original = rig.snapshot.triangle_count();
    let body_triangles: usize = [&result.front[0], &result.back[0]]
        .iter()
        .map(|p| p.submesh(0).map_or(0, |s| s.len() / 3))
        .sum();
    assert!(body_triangles >= original);
}

#[test]
fn caps_face_away_from_their_partition() {
    let rig = demo::two_bone_cylinder(SEGMENTS).unwrap();
    let spec = rig.specification("lower", 0.0, None).unwrap();
    let result = slice(&spec, &SliceArena::default()).unwrap();

    let front = cap_normals_y(&result.front[0], 1);
    let back = cap_normals_y(&result.back[0], 1);
    assert!(!front.is_empty() && !back.is_empty());
    assert!(front.iter().all(|y| *y < 0.0));
    assert!(back.iter().all(|y| *y > 0.0));

    // Half the split points sit on chords, so the cap is the inscribed polygon.
    let polygon =
        0.5 * SEGMENTS as f32 * RADIUS * RADIUS * (std::f32::consts::TAU / SEGMENTS as f32).sin();
    assert_relative_eq!(cap_area(&result.front[0], 1), polygon, epsilon = 1e-4);
    assert_relative_eq!(cap_area(&result.back[0], 1), polygon, epsilon = 1e-4);
}

#[test]
fn meticulous_cut_produces_caps() {
    let rig = demo::two_bone_cylinder(SEGMENTS).unwrap();
    let mut spec = rig.specification("lower", 0.0, None).unwrap();
    spec.infill_mode = InfillMode::Meticulous;
    let result = slice(&spec, &SliceArena::default()).unwrap();

    assert_eq!(result.stats[0].dropped_loops, 0);
    assert!(result.stats[0].infill_triangles > 0);
    for part in [&result.front[0], &result.back[0]] {
        assert!(part.submesh(1).is_some_and(|cap| !cap.is_empty()));
    }
}

#[test]
fn partitions_respect_the_plane() {
    let rig = demo::two_bone_cylinder(SEGMENTS).unwrap();
    let spec = rig.specification("lower", 0.5, None).unwrap();
    let result = slice(&spec, &SliceArena::default()).unwrap();

    assert_relative_eq!(result.focal_world, Point3::new(0.0, 1.5, 0.0), epsilon = 1e-5);
    for p in result.front[0].positions() {
        assert!(p.y >= 1.5 - 1e-4);
    }
    for p in result.back[0].positions() {
        assert!(p.y <= 1.5 + 1e-4);
    }
}

#[test]
fn cutting_without_material_leaves_holes() {
    let rig = demo::two_bone_cylinder(SEGMENTS).unwrap();
    let mut spec = rig.specification("lower", 0.0, None).unwrap();
    spec.infill_material = None;
    let result = slice(&spec, &SliceArena::default()).unwrap();

    assert_eq!(result.stats[0].infill_triangles, 0);
    assert_eq!(result.front[0].submesh_count(), 1);
    assert_eq!(result.front[0].infill_index(), None);
}

#[test]
fn second_cut_reuses_the_infill_slot() {
    let rig = demo::two_bone_cylinder(SEGMENTS).unwrap();
    let spec = rig.specification("upper", 0.5, None).unwrap();
    let first = slice(&spec, &SliceArena::default()).unwrap();

    // Cut what stayed behind again, lower down.
    let mut again = rig.specification("upper", 0.25, None).unwrap();
    again.snapshots = vec![first.back[0].clone()];
    let second = slice(&again, &SliceArena::default()).unwrap();

    for part in [&second.front[0], &second.back[0]] {
        assert_eq!(part.submesh_count(), 2);
        assert_eq!(part.infill_index(), Some(1));
    }
}

#[test]
fn bone_presence_follows_the_flood_fill() {
    let rig = demo::two_bone_cylinder(SEGMENTS).unwrap();
    let spec = rig.specification("lower", 0.0, None).unwrap();

    let front = spec.bone_presence(Side::Front);
    assert!(front["lower"] && front["tip"]);
    assert!(!front["upper"] && !front["armature"]);

    let back = spec.bone_presence(Side::Back);
    assert!(!back["lower"] && back["upper"]);
}
