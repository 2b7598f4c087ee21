// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JSON report types.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use sever_geometry::MeshSnapshot;
use sever_processing::{SliceError, SliceEvent, SliceHandler, TargetId};

/// Summary of one partition.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionSummary {
    pub vertices: usize,
    pub triangles: usize,
    /// Triangles per material slot.
    pub submeshes: Vec<usize>,
    pub infill_index: Option<usize>,
}

impl PartitionSummary {
    pub fn from_snapshot(snapshot: &MeshSnapshot) -> Self {
        Self {
            vertices: snapshot.vertex_count(),
            triangles: snapshot.triangle_count(),
            submeshes: snapshot.submeshes().map(|s| s.len() / 3).collect(),
            infill_index: snapshot.infill_index(),
        }
    }
}

/// One applied or failed cut.
#[derive(Debug, Clone, Serialize)]
pub struct CutReport {
    pub target: u64,
    pub joint: String,
    pub progression: f32,
    /// Plane coefficients (nx, ny, nz, w) in world space.
    pub plane: Option<[f32; 4]>,
    pub focal: Option<[f32; 3]>,
    pub split_triangles: usize,
    pub infill_triangles: usize,
    pub front: Vec<PartitionSummary>,
    pub back: Vec<PartitionSummary>,
    pub error: Option<String>,
}

/// What happened to one hit.
#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub hit_y: f32,
    pub target: u64,
    pub outcome: String,
}

/// Full output of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub worker_mode: String,
    pub infill_mode: String,
    pub segments: usize,
    pub requests: Vec<RequestReport>,
    pub cuts: Vec<CutReport>,
    pub time_ms: u64,
}

/// Slice handler that collects a [`CutReport`] per callback.
#[derive(Default, Clone)]
pub struct Collector {
    reports: Arc<Mutex<Vec<CutReport>>>,
}

impl Collector {
    pub fn take(&self) -> Vec<CutReport> {
        self.reports
            .lock()
            .map(|mut reports| std::mem::take(&mut *reports))
            .unwrap_or_default()
    }

    fn push(&self, report: CutReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report);
        }
    }
}

impl SliceHandler for Collector {
    fn on_sliced(&self, event: &SliceEvent<'_>) {
        let plane = event.result.plane_world.coefficients();
        let focal = event.result.focal_world;
        self.push(CutReport {
            target: event.target.0,
            joint: event.specification.joint.to_string(),
            progression: event.specification.progression,
            plane: Some([plane.x, plane.y, plane.z, plane.w]),
            focal: Some([focal.x, focal.y, focal.z]),
            split_triangles: event.result.stats.iter().map(|s| s.split_triangles).sum(),
            infill_triangles: event.result.stats.iter().map(|s| s.infill_triangles).sum(),
            front: event.result.front.iter().map(PartitionSummary::from_snapshot).collect(),
            back: event.result.back.iter().map(PartitionSummary::from_snapshot).collect(),
            error: None,
        });
    }

    fn on_failed(&self, target: TargetId, error: &SliceError) {
        self.push(CutReport {
            target: target.0,
            joint: String::new(),
            progression: 0.0,
            plane: None,
            focal: None,
            split_triangles: 0,
            infill_triangles: 0,
            front: Vec::new(),
            back: Vec::new(),
            error: Some(error.to_string()),
        });
    }
}
