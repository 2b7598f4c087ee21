// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Polygon triangulation utilities
//!
//! Wrapper around earcutr for triangulating cut cross-sections once they have
//! been projected into the plane.

use nalgebra::Point2;

use crate::{Error, Result};

/// Twice the signed area of a 2D triangle; positive when counter-clockwise
#[inline]
pub fn signed_area(a: &Point2<f32>, b: &Point2<f32>, c: &Point2<f32>) -> f32 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Check if a polygon is convex (all cross products have same sign)
#[inline]
fn is_convex(points: &[Point2<f32>]) -> bool {
    if points.len() < 3 {
        return false;
    }

    let n = points.len();
    let mut sign = 0i8;

    for i in 0..n {
        let cross = signed_area(&points[i], &points[(i + 1) % n], &points[(i + 2) % n]);

        if cross.abs() > 1e-10 {
            let current_sign = if cross > 0.0 { 1i8 } else { -1i8 };
            if sign == 0 {
                sign = current_sign;
            } else if sign != current_sign {
                return false;
            }
        }
    }

    true
}

/// Simple fan triangulation for convex polygons
#[inline]
fn fan_triangulate(n: usize) -> Vec<usize> {
    let mut indices = Vec::with_capacity((n - 2) * 3);
    for i in 1..n - 1 {
        indices.push(0);
        indices.push(i);
        indices.push(i + 1);
    }
    indices
}

/// Triangulate a simple closed loop (no holes)
/// Returns triangle indices into the input points; winding is not normalized
#[inline]
pub fn triangulate_loop(points: &[Point2<f32>]) -> Result<Vec<usize>> {
    let n = points.len();

    if n < 3 {
        return Err(Error::TriangulationError(
            "Need at least 3 points to triangulate".to_string(),
        ));
    }

    // FAST PATH: Triangle - no triangulation needed
    if n == 3 {
        return Ok(vec![0, 1, 2]);
    }

    // FAST PATH: Convex loop - use fan triangulation
    if n <= 8 && is_convex(points) {
        return Ok(fan_triangulate(n));
    }

    // Flatten points for earcutr
    let mut vertices = Vec::with_capacity(n * 2);
    for p in points {
        vertices.push(p.x as f64);
        vertices.push(p.y as f64);
    }

    let indices = earcutr::earcut(&vertices, &[], 2)
        .map_err(|e| Error::TriangulationError(format!("{:?}", e)))?;

    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered_area(points: &[Point2<f32>], indices: &[usize]) -> f32 {
        indices
            .chunks_exact(3)
            .map(|t| signed_area(&points[t[0]], &points[t[1]], &points[t[2]]).abs() * 0.5)
            .sum()
    }

    #[test]
    fn test_triangulate_triangle() {
        let points = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(0.5, 1.0),
        ];
        assert_eq!(triangulate_loop(&points).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_triangulate_square() {
        let points = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let indices = triangulate_loop(&points).unwrap();
        assert_eq!(indices.len(), 6);
        assert!((covered_area(&points, &indices) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_triangulate_concave() {
        // L shape, area 3
        let points = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(2.0, 1.0),
            Point2::new(1.0, 1.0),
            Point2::new(1.0, 2.0),
            Point2::new(0.0, 2.0),
        ];
        let indices = triangulate_loop(&points).unwrap();
        assert_eq!(indices.len(), 12);
        assert!((covered_area(&points, &indices) - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_too_few_points() {
        let points = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)];
        assert!(triangulate_loop(&points).is_err());
    }
}
