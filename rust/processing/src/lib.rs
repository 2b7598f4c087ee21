// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sever Processing
//!
//! Turns cut requests against skinned targets into slice jobs, runs the
//! geometry kernel inline or on a rayon pool, and applies results on the
//! controlling thread.

pub mod config;
pub mod demo;
pub mod error;
pub mod global;
pub mod job;
pub mod kernel;
pub mod scheduler;
pub mod skeleton;
pub mod target;

pub use config::{Config, WorkerThreadMode};
pub use error::{SchedulerError, SliceError};
pub use job::{JobId, SliceJobSpecification, SliceJobState, SliceJobYield};
pub use scheduler::{RejectReason, SliceScheduler, Submission};
pub use skeleton::{
    build_node_metadata, determine_slice, resolve_world_transforms, JointChoice, NodeMap,
    NodeMetadata, SkeletonNode,
};
pub use target::{
    Addressee, ChildId, CutRequest, DecisionMaker, SceneTarget, SliceEvent, SliceHandler,
    TargetId, TargetRegistry,
};
