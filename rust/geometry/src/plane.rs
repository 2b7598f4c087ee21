// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cutting planes
//!
//! A cut is anchored at a joint. The plane normal points from the joint's
//! parent toward its children and the focal point slides from the joint to
//! the mean of its children as progression goes from 0 to 1. An optional tilt
//! bends the normal, but never by more than a fixed half-angle.

use nalgebra::{Point2, Point3, Vector3, Vector4};

use crate::{Error, Result};

/// Progression is clamped below 1 so the segment to the children never collapses
pub const MAX_PROGRESSION: f32 = 0.99;

/// Half-angle of the cone a tilted normal is kept within
pub const DEFAULT_MAX_TILT_DEGREES: f32 = 30.0;

/// Vertices this far behind the plane still count as front
pub const PLANE_EPSILON: f32 = 1e-5;

const BISECTION_STEPS: usize = 16;
const MAX_REPAIR: f32 = 100.0;

/// Which partition a point belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Side {
    /// The severed side, in front of the plane
    Front,
    #[default]
    Back,
}

impl Side {
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Side::Front => Side::Back,
            Side::Back => Side::Front,
        }
    }
}

/// Plane in `n·p + w = 0` form with a unit normal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vector3<f32>,
    pub w: f32,
}

impl Plane {
    pub fn new(normal: Vector3<f32>, w: f32) -> Self {
        Self { normal, w }
    }

    /// Plane through `point` facing `normal`
    pub fn from_point_normal(point: &Point3<f32>, normal: &Vector3<f32>) -> Result<Self> {
        let normal = normal
            .try_normalize(f32::EPSILON)
            .ok_or_else(|| Error::DegeneratePlane(format!("zero normal {:?}", normal)))?;
        Ok(Self {
            normal,
            w: -normal.dot(&point.coords),
        })
    }

    #[inline]
    pub fn signed_distance(&self, point: &Point3<f32>) -> f32 {
        self.normal.dot(&point.coords) + self.w
    }

    #[inline]
    pub fn side(&self, point: &Point3<f32>) -> Side {
        if self.signed_distance(point) >= -PLANE_EPSILON {
            Side::Front
        } else {
            Side::Back
        }
    }

    /// The four plane coefficients (nx, ny, nz, w)
    #[inline]
    pub fn coefficients(&self) -> Vector4<f32> {
        Vector4::new(self.normal.x, self.normal.y, self.normal.z, self.w)
    }

    pub fn flipped(&self) -> Self {
        Self {
            normal: -self.normal,
            w: -self.w,
        }
    }
}

/// Skeletal anchors in a common space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneAnchors {
    pub joint: Point3<f32>,
    /// The parent joint, or the space origin when the parent is not skinned
    pub parent: Point3<f32>,
    /// Mean of the direct children, or the space origin when there are none
    pub mean_child: Point3<f32>,
}

/// A solved cut: the plane and the point it was anchored on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolvedPlane {
    pub plane: Plane,
    pub focal: Point3<f32>,
}

/// Derive the cutting plane from skeletal anchors.
///
/// `tilt` must already be expressed in the same space as `anchors`.
pub fn solve_plane(
    anchors: &PlaneAnchors,
    progression: f32,
    tilt: Option<&Vector3<f32>>,
    max_tilt_degrees: f32,
) -> Result<SolvedPlane> {
    let t = progression.clamp(0.0, MAX_PROGRESSION);

    let to_parent = anchors.parent - anchors.joint;
    let to_joint_from_children = anchors.joint - anchors.mean_child;
    let focal = anchors.joint + (anchors.mean_child - anchors.joint) * t;

    let direction = to_parent.lerp(&to_joint_from_children, t);
    let mut normal = -direction.try_normalize(f32::EPSILON).ok_or_else(|| {
        Error::DegeneratePlane(format!(
            "joint at {:?} coincides with its anchors",
            anchors.joint
        ))
    })?;

    if let Some(tilt) = tilt.and_then(|v| v.try_normalize(f32::EPSILON)) {
        let tilt = if tilt.dot(&normal) < 0.0 { -tilt } else { tilt };
        normal = clamp_to_bicone(&tilt, &normal, max_tilt_degrees);
    }

    Ok(SolvedPlane {
        plane: Plane::new(normal, -normal.dot(&focal.coords)),
        focal,
    })
}

/// Pull `v` into the double cone of half-angle `degrees` around `axis`.
///
/// Both inputs are unit vectors. The correction is a multiple of `axis`
/// found by bisection so the result sits just inside the cone.
pub fn clamp_to_bicone(v: &Vector3<f32>, axis: &Vector3<f32>, degrees: f32) -> Vector3<f32> {
    let min_dot = degrees.to_radians().cos();
    let dot = v.dot(axis);

    if dot.abs() >= min_dot {
        return *v;
    }

    let sign = if dot < 0.0 { -1.0 } else { 1.0 };
    let repair = axis * ((min_dot - dot.abs()) * sign);
    let inside = |k: f32| {
        (v + repair * k)
            .try_normalize(f32::EPSILON)
            .filter(|c| c.dot(axis).abs() >= min_dot)
    };

    let Some(mut best) = inside(MAX_REPAIR) else {
        // Project straight onto the cone surface.
        let ortho = (v - axis * dot)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| axis.cross(&any_perpendicular(axis)));
        return axis * (min_dot * sign) + ortho * (1.0 - min_dot * min_dot).sqrt();
    };

    let (mut lo, mut hi) = (1.0, MAX_REPAIR);
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        match inside(mid) {
            Some(candidate) => {
                best = candidate;
                hi = mid;
            }
            None => lo = mid,
        }
    }
    best
}

fn any_perpendicular(v: &Vector3<f32>) -> Vector3<f32> {
    let helper = if v.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    v.cross(&helper).normalize()
}

/// Orthonormal frame in the plane with `u × v = normal`.
///
/// Points projected through it are counter-clockwise when seen from the
/// side the normal points to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneBasis {
    pub u: Vector3<f32>,
    pub v: Vector3<f32>,
    pub normal: Vector3<f32>,
}

impl PlaneBasis {
    pub fn new(normal: &Vector3<f32>) -> Self {
        let u = any_perpendicular(normal);
        let v = normal.cross(&u);
        Self {
            u,
            v,
            normal: *normal,
        }
    }

    #[inline]
    pub fn project(&self, point: &Point3<f32>) -> Point2<f32> {
        Point2::new(point.coords.dot(&self.u), point.coords.dot(&self.v))
    }
}
