// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capping the cut cross-section
//!
//! Each boundary vertex is copied twice: once facing away from the front
//! partition and once facing away from the back one. Cap UVs come from
//! projecting the boundary into the plane and fitting it to the unit square.
//!
//! Two strategies build the cap triangles:
//! - [`InfillMode::Sloppy`] fans every boundary vertex around their mean.
//!   Cheap, and right for convex single-loop sections.
//! - [`InfillMode::Meticulous`] rebuilds each boundary loop by walking the
//!   intersection pairs, then ear-clips every loop. Loops under three
//!   points, or that fail to triangulate, are left open.

use std::cmp::Ordering;
use std::str::FromStr;

use nalgebra::{Point2, Point3, Vector2, Vector3};
use rustc_hash::FxHashMap;

use crate::plane::{Plane, PlaneBasis};
use crate::pool::{Pooled, SliceArena};
use crate::snapshot::BoneWeight;
use crate::split::{SplitOutput, WorkingMesh};
use crate::triangulation::{signed_area, triangulate_loop};

/// Points closer than this (squared, and per projected axis) are one point
const MERGE_EPSILON: f32 = 1.0 / 65536.0;

/// Twice-area below which a cap triangle is dropped
const MIN_CAP_AREA: f32 = 1e-12;

/// Hole-filling strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InfillMode {
    #[default]
    Sloppy,
    Meticulous,
}

impl FromStr for InfillMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sloppy" => Ok(InfillMode::Sloppy),
            "meticulous" => Ok(InfillMode::Meticulous),
            other => Err(format!("unknown infill mode '{}'", other)),
        }
    }
}

/// Cap triangles for each partition
pub struct InfillOutput<'a> {
    pub front: Pooled<'a, Vec<u32>>,
    pub back: Pooled<'a, Vec<u32>>,
    /// Boundary loops that were dropped
    pub dropped_loops: usize,
}

impl InfillOutput<'_> {
    pub fn triangle_count(&self) -> usize {
        (self.front.len() + self.back.len()) / 3
    }
}

/// Build both caps for the boundary produced by a split.
///
/// Infill vertices are appended to `working` after the boundary vertices.
/// The front cap faces `-plane.normal`, the back cap faces `+plane.normal`.
pub fn fill<'a>(
    mode: InfillMode,
    plane: &Plane,
    working: &mut WorkingMesh<'a>,
    split: &SplitOutput<'a>,
    arena: &'a SliceArena,
) -> InfillOutput<'a> {
    let count = split.boundary_count;
    let mut output = InfillOutput {
        front: arena.indices.get(count * 3),
        back: arena.indices.get(count * 3),
        dropped_loops: 0,
    };
    if count < 3 {
        return output;
    }

    let start = working.origin_count;
    let basis = PlaneBasis::new(&plane.normal);

    let mut projected = arena.projected.get(count);
    projected.extend(working.positions[start..start + count].iter().map(|p| basis.project(p)));

    let (min, max) = projected.iter().fold(
        (
            Point2::new(f32::MAX, f32::MAX),
            Point2::new(f32::MIN, f32::MIN),
        ),
        |(lo, hi), p| (lo.inf(p), hi.sup(p)),
    );
    let extent = (max - min).max();
    let scale = if extent > f32::EPSILON { 1.0 / extent } else { 1.0 };

    let front_base = working.len() as u32;
    for k in 0..count {
        let uv = (projected[k] - min) * scale;
        let (position, weight) = (working.positions[start + k], working.weights[start + k]);
        working.push(position, -plane.normal, uv, weight);
    }
    let back_base = working.len() as u32;
    for k in 0..count {
        let uv = (projected[k] - min) * scale;
        let (position, weight) = (working.positions[start + k], working.weights[start + k]);
        working.push(position, plane.normal, uv, weight);
    }

    let caps = CapBases {
        front: front_base,
        back: back_base,
    };
    match mode {
        InfillMode::Sloppy => {
            fill_sloppy(plane, working, &projected, caps, min, scale, &mut output, arena)
        }
        InfillMode::Meticulous => {
            fill_meticulous(working, split, &projected, caps, &mut output, arena)
        }
    }

    output
}

#[derive(Clone, Copy)]
struct CapBases {
    front: u32,
    back: u32,
}

impl CapBases {
    /// Emit a cap triangle over boundary vertices `a`, `b`, `c`, given
    /// counter-clockwise in the plane basis
    #[inline]
    fn emit(&self, a: u32, b: u32, c: u32, output: &mut InfillOutput<'_>) {
        output
            .front
            .extend_from_slice(&[self.front + a, self.front + c, self.front + b]);
        output
            .back
            .extend_from_slice(&[self.back + a, self.back + b, self.back + c]);
    }
}

#[allow(clippy::too_many_arguments)]
fn fill_sloppy<'a>(
    plane: &Plane,
    working: &mut WorkingMesh<'a>,
    projected: &[Point2<f32>],
    caps: CapBases,
    min: Point2<f32>,
    scale: f32,
    output: &mut InfillOutput<'a>,
    arena: &'a SliceArena,
) {
    let count = projected.len();
    let start = working.origin_count;
    let boundary = start..start + count;

    let inv = 1.0 / count as f32;
    let center_2d =
        Point2::from(projected.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) * inv);
    let center = Point3::from(
        working.positions[boundary.clone()]
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords)
            * inv,
    );
    let center_uv = (center_2d - min) * scale;
    let center_weight = vote_bone(&working.weights[boundary]);

    let front_center = working.push(center, -plane.normal, center_uv, center_weight);
    let back_center = working.push(center, plane.normal, center_uv, center_weight);

    let mut angles = arena.scalars.get(count);
    angles.extend(projected.iter().map(|p| (p.y - center_2d.y).atan2(p.x - center_2d.x)));

    let mut order = arena.indices.get(count);
    order.extend(0..count as u32);
    order.sort_by(|a, b| angles[*a as usize].total_cmp(&angles[*b as usize]));

    for k in 0..count {
        let current = order[k];
        let next = order[(k + 1) % count];
        output
            .front
            .extend_from_slice(&[front_center, caps.front + next, caps.front + current]);
        output
            .back
            .extend_from_slice(&[back_center, caps.back + current, caps.back + next]);
    }
}

/// The bone carrying the most weight across every vertex's strongest influence
fn vote_bone(weights: &[BoneWeight]) -> BoneWeight {
    let mut votes: FxHashMap<u32, f32> = FxHashMap::default();
    for (bone, weight) in weights.iter().filter_map(BoneWeight::strongest) {
        *votes.entry(bone).or_insert(0.0) += weight;
    }
    votes
        .into_iter()
        .max_by(|a, b| match a.1.total_cmp(&b.1) {
            Ordering::Equal => b.0.cmp(&a.0),
            ordering => ordering,
        })
        .map(|(bone, _)| BoneWeight::single(bone))
        .unwrap_or_default()
}

fn fill_meticulous<'a>(
    working: &WorkingMesh<'a>,
    split: &SplitOutput<'a>,
    projected: &[Point2<f32>],
    caps: CapBases,
    output: &mut InfillOutput<'a>,
    arena: &'a SliceArena,
) {
    let start = working.origin_count as u32;
    let pairs = &split.intersections[..];
    let local = |entry: usize| (pairs[entry] - start) as usize;

    let mut sqr_mags = arena.scalars.get(projected.len());
    sqr_mags.extend(
        working.positions[working.origin_count..working.origin_count + projected.len()]
            .iter()
            .map(|p| p.coords.norm_squared()),
    );

    let mut available = arena.flags.get(pairs.len());
    available.resize(pairs.len(), true);
    let mut polygon = arena.indices.get(pairs.len());
    let mut points = arena.projected.get(pairs.len());

    while let Some(loop_start) = available.iter().position(|a| *a) {
        available[loop_start] = false;
        available[loop_start ^ 1] = false;
        polygon.clear();
        polygon.push(local(loop_start) as u32);
        let mut seeking = loop_start ^ 1;

        // A chain that never meets itself is closed back to its start.
        loop {
            let here = local(seeking);
            let best = nearest_continuation(pairs.len(), loop_start, &available, |entry| {
                let candidate = local(entry);
                if candidate == here {
                    0.0
                } else {
                    (working.positions[start as usize + candidate]
                        - working.positions[start as usize + here])
                        .norm_squared()
                }
            });
            if best == loop_start {
                break;
            }

            available[best] = false;
            available[best ^ 1] = false;
            seeking = best ^ 1;

            let candidate = local(best);
            let last = *polygon.last().unwrap_or(&(candidate as u32)) as usize;
            if !is_degenerate(candidate, last, &sqr_mags, projected) {
                polygon.push(candidate as u32);
            }
        }

        if polygon.len() < 3 {
            tracing::debug!(points = polygon.len(), "dropping boundary loop");
            output.dropped_loops += 1;
            continue;
        }

        points.clear();
        points.extend(polygon.iter().map(|k| projected[*k as usize]));

        let triangles = match triangulate_loop(&points) {
            Ok(triangles) => triangles,
            Err(error) => {
                tracing::debug!(%error, points = polygon.len(), "dropping boundary loop");
                output.dropped_loops += 1;
                continue;
            }
        };

        for t in triangles.chunks_exact(3) {
            let (a, b, c) = (polygon[t[0]], polygon[t[1]], polygon[t[2]]);
            let area = signed_area(
                &projected[a as usize],
                &projected[b as usize],
                &projected[c as usize],
            );
            if area > MIN_CAP_AREA {
                caps.emit(a, b, c, output);
            } else if area < -MIN_CAP_AREA {
                caps.emit(a, c, b, output);
            }
        }
    }
}

/// Entry that continues the loop from the point scored by `distance`.
///
/// An exact vertex match scores zero and wins. The loop start is always a
/// candidate, so the walk always closes.
fn nearest_continuation(
    len: usize,
    loop_start: usize,
    available: &[bool],
    distance: impl Fn(usize) -> f32,
) -> usize {
    let mut best = (loop_start, distance(loop_start));
    for entry in (0..len).filter(|e| *e != loop_start && available[*e]) {
        let d = distance(entry);
        if d < best.1 || (d == 0.0 && best.1 == 0.0) {
            best = (entry, d);
        }
    }
    best.0
}

fn is_degenerate(
    candidate: usize,
    last: usize,
    sqr_mags: &[f32],
    projected: &[Point2<f32>],
) -> bool {
    if candidate == last {
        return true;
    }
    if (sqr_mags[candidate] - sqr_mags[last]).abs() >= MERGE_EPSILON {
        return false;
    }
    let delta = projected[candidate] - projected[last];
    delta.x.abs() < MERGE_EPSILON && delta.y.abs() < MERGE_EPSILON
}
