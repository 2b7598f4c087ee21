// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler configuration loaded from environment variables.

use std::str::FromStr;

use sever_geometry::{InfillMode, MaterialHandle, DEFAULT_MAX_TILT_DEGREES, DEFAULT_POOL_SIZE};

/// Where slice kernels run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerThreadMode {
    /// Inline on the controlling thread; results are applied before `submit` returns
    #[default]
    Synchronous,
    /// On a worker pool; results are applied by `poll`
    Asynchronous,
}

impl FromStr for WorkerThreadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(WorkerThreadMode::Synchronous),
            "async" | "asynchronous" => Ok(WorkerThreadMode::Asynchronous),
            other => Err(format!("unknown worker mode '{}'", other)),
        }
    }
}

/// Slice scheduler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Whether kernels run inline or on the worker pool.
    pub worker_mode: WorkerThreadMode,
    /// Number of worker threads in asynchronous mode.
    pub worker_threads: usize,
    /// Cap strategy for targets that do not choose one.
    pub infill_mode: InfillMode,
    /// Cap material for targets that do not choose one.
    pub infill_material: Option<MaterialHandle>,
    /// Idle buffers kept per scratch pool.
    pub pool_size: usize,
    /// Half-angle a tilted cut may lean away from the bone axis.
    pub max_tilt_degrees: f32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_mode: std::env::var("SEVER_WORKER_MODE")
                .unwrap_or_else(|_| "sync".into())
                .parse()
                .unwrap_or(defaults.worker_mode),
            worker_threads: std::env::var("SEVER_WORKER_THREADS")
                .unwrap_or_else(|_| num_cpus::get().to_string())
                .parse()
                .unwrap_or_else(|_| num_cpus::get())
                .max(1),
            infill_mode: std::env::var("SEVER_INFILL_MODE")
                .unwrap_or_else(|_| "sloppy".into())
                .parse()
                .unwrap_or(defaults.infill_mode),
            infill_material: std::env::var("SEVER_INFILL_MATERIAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(MaterialHandle),
            pool_size: std::env::var("SEVER_POOL_SIZE")
                .unwrap_or_else(|_| DEFAULT_POOL_SIZE.to_string())
                .parse()
                .unwrap_or(DEFAULT_POOL_SIZE),
            max_tilt_degrees: std::env::var("SEVER_MAX_TILT_DEGREES")
                .unwrap_or_else(|_| DEFAULT_MAX_TILT_DEGREES.to_string())
                .parse()
                .unwrap_or(DEFAULT_MAX_TILT_DEGREES),
        }
    }

    pub fn with_worker_mode(mut self, worker_mode: WorkerThreadMode) -> Self {
        self.worker_mode = worker_mode;
        self
    }

    pub fn with_infill(mut self, material: Option<MaterialHandle>, mode: InfillMode) -> Self {
        self.infill_material = material;
        self.infill_mode = mode;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_mode: WorkerThreadMode::Synchronous,
            worker_threads: num_cpus::get().max(1),
            infill_mode: InfillMode::Sloppy,
            infill_material: None,
            pool_size: DEFAULT_POOL_SIZE,
            max_tilt_degrees: DEFAULT_MAX_TILT_DEGREES,
        }
    }
}
