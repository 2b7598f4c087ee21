// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sever Geometry Kernel
//!
//! Cuts skinned meshes along a plane anchored at a skeletal joint. Vertices
//! are sorted by skin weight and plane side, straddling triangles are split,
//! the cross-section is capped with earcutr-triangulated infill, and both
//! partitions are compacted into new immutable snapshots. Scratch buffers
//! come from a shared, lock-guarded [`SliceArena`].

pub mod cut;
pub mod error;
pub mod infill;
pub mod plane;
pub mod pool;
pub mod retopology;
pub mod snapshot;
pub mod split;
pub mod triangulation;

// Re-export nalgebra types for convenience
pub use nalgebra::{Matrix4, Point2, Point3, UnitQuaternion, Vector2, Vector3, Vector4};

pub use cut::{cut_snapshot, mean_point, CutParameters, CutResult, CutStats};
pub use error::{Error, Result};
pub use infill::InfillMode;
pub use plane::{
    solve_plane, Plane, PlaneAnchors, Side, SolvedPlane, DEFAULT_MAX_TILT_DEGREES, MAX_PROGRESSION,
};
pub use pool::{BufferPool, Pooled, SliceArena, DEFAULT_POOL_SIZE};
pub use snapshot::{BoneMetadata, BoneWeight, MaterialHandle, MeshSnapshot, SnapshotParts};
