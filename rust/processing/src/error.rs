// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Why a slice job failed. Stored in the failed job state and handed to
/// every slice handler of the target.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SliceError {
    #[error("Geometry error: {0}")]
    Geometry(#[from] sever_geometry::Error),

    #[error("Unknown joint: {0}")]
    UnknownJoint(String),

    #[error("Missing node: {0}")]
    MissingNode(String),

    #[error("Singular transform on node {0}")]
    SingularTransform(String),

    #[error("Slice kernel panicked: {0}")]
    Panicked(String),
}

/// Errors from creating or reaching the scheduler
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Slice scheduler is already initialized")]
    AlreadyInitialized,

    #[error("Slice scheduler is not initialized")]
    NotInitialized,
}
