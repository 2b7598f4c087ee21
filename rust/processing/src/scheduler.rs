// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Job submission and result application
//!
//! One controlling thread owns the scheduler. It submits jobs, and in
//! asynchronous mode calls [`SliceScheduler::poll`] once per tick to apply
//! whatever finished on the rayon pool, in completion order. The kernel
//! never touches the registry; only the controlling thread applies results.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::{FxHashMap, FxHashSet};
use sever_geometry::{SliceArena, Vector3};

use crate::config::{Config, WorkerThreadMode};
use crate::error::{SchedulerError, SliceError};
use crate::job::{JobId, SliceJobSpecification, SliceJobState, SliceJobYield};
use crate::kernel;
use crate::skeleton::{build_node_metadata, determine_slice};
use crate::target::{CutRequest, SliceEvent, TargetId, TargetRegistry};

/// Why a request did not produce a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The target already has a job in flight
    Duplicate,
    /// Unknown target, no meshes, no severable joints, or no joint near the hit
    MissingConfiguration,
    /// The target's decision maker declined the joint
    Denied,
    /// The target was destroyed by an earlier cut
    Retired,
}

/// What became of a request
#[derive(Debug, Clone)]
pub enum Submission {
    Rejected(RejectReason),
    /// Running on the worker pool; see [`SliceScheduler::poll`]
    Pending(JobId),
    Yielded(Arc<SliceJobYield>),
    Failed(Arc<SliceError>),
}

impl Submission {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Submission::Rejected(_))
    }
}

struct Completion {
    job: JobId,
    outcome: Result<SliceJobYield, SliceError>,
}

struct InFlight {
    specification: Arc<SliceJobSpecification>,
    state: SliceJobState,
    submitted: Instant,
}

pub struct SliceScheduler {
    config: Config,
    arena: Arc<SliceArena>,
    pool: Option<rayon::ThreadPool>,
    registry: TargetRegistry,
    pending: FxHashMap<JobId, InFlight>,
    pending_targets: FxHashSet<TargetId>,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    next_job: JobId,
}

impl SliceScheduler {
    pub fn new(config: Config) -> Result<Self, SchedulerError> {
        let pool = match config.worker_mode {
            WorkerThreadMode::Synchronous => None,
            WorkerThreadMode::Asynchronous => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.worker_threads)
                    .thread_name(|i| format!("sever-worker-{}", i))
                    .build()?,
            ),
        };
        let (sender, receiver) = mpsc::channel();

        tracing::info!(
            worker_mode = ?config.worker_mode,
            worker_threads = config.worker_threads,
            infill_mode = ?config.infill_mode,
            pool_size = config.pool_size,
            "Starting slice scheduler"
        );

        Ok(Self {
            arena: Arc::new(SliceArena::new(config.pool_size)),
            config,
            pool,
            registry: TargetRegistry::new(),
            pending: FxHashMap::default(),
            pending_targets: FxHashSet::default(),
            sender,
            receiver,
            next_job: 0,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TargetRegistry {
        &mut self.registry
    }

    pub fn arena(&self) -> &Arc<SliceArena> {
        &self.arena
    }

    /// Jobs submitted but not yet applied
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Resolve a world-space hit to a joint and submit the cut
    pub fn request_cut(&mut self, request: &CutRequest) -> Submission {
        let Some(id) = self.registry.resolve(request.addressee) else {
            tracing::warn!(addressee = ?request.addressee, "cut request for unknown target");
            return Submission::Rejected(RejectReason::MissingConfiguration);
        };
        if let Some(rejected) = self.admission(id) {
            return rejected;
        }
        let Some(target) = self.registry.get(id).cloned() else {
            return Submission::Rejected(RejectReason::MissingConfiguration);
        };

        let choice = match determine_slice(&target.skeleton, &target.severables, &request.point) {
            Ok(Some(choice)) => choice,
            Ok(None) => {
                tracing::warn!(target_id = %id, "target has no severable joints");
                return Submission::Rejected(RejectReason::MissingConfiguration);
            }
            Err(e) => {
                tracing::warn!(target_id = %id, error = %e, "could not pick a joint");
                return Submission::Rejected(RejectReason::MissingConfiguration);
            }
        };

        if let Some(decision_maker) = &target.decision_maker {
            if !decision_maker.should_sever(&choice.joint) {
                tracing::debug!(target_id = %id, joint = %choice.joint, "cut denied");
                return Submission::Rejected(RejectReason::Denied);
            }
        }

        self.sever_by_joint(id, &choice.joint, choice.progression, request.normal)
    }

    /// Cut `target` at a named joint, skipping joint selection
    pub fn sever_by_joint(
        &mut self,
        target: TargetId,
        joint: &str,
        progression: f32,
        tilt: Option<Vector3<f32>>,
    ) -> Submission {
        if let Some(rejected) = self.admission(target) {
            return rejected;
        }
        let Some(scene) = self.registry.get(target).cloned() else {
            tracing::warn!(target_id = %target, "cut request for unknown target");
            return Submission::Rejected(RejectReason::MissingConfiguration);
        };
        if scene.snapshots.is_empty() {
            tracing::warn!(target_id = %target, "target has no skinned meshes");
            return Submission::Rejected(RejectReason::MissingConfiguration);
        }

        let nodes = match build_node_metadata(&scene.skeleton, joint) {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!(target_id = %target, joint, error = %e, "joint not in skeleton");
                return Submission::Rejected(RejectReason::MissingConfiguration);
            }
        };

        let specification = SliceJobSpecification {
            target,
            snapshots: scene.snapshots.clone(),
            nodes,
            infill_material: scene.infill_material.or(self.config.infill_material),
            joint: joint.into(),
            progression,
            tilt,
            max_tilt_degrees: scene
                .max_tilt_by_joint
                .get(joint)
                .copied()
                .unwrap_or(self.config.max_tilt_degrees),
            infill_mode: scene.infill_mode.unwrap_or(self.config.infill_mode),
            destroy_original: true,
        };

        self.submit(specification)
    }

    /// Run or enqueue a prepared job
    pub fn submit(&mut self, specification: SliceJobSpecification) -> Submission {
        let target = specification.target;
        if let Some(rejected) = self.admission(target) {
            return rejected;
        }

        self.next_job += 1;
        let job = self.next_job;
        let specification = Arc::new(specification);

        tracing::info!(
            job,
            target_id = %target,
            joint = %specification.joint,
            progression = specification.progression,
            infill_mode = ?specification.infill_mode,
            "Submitting slice job"
        );

        match &self.pool {
            None => {
                let submitted = Instant::now();
                let outcome = run_kernel(&specification, &self.arena);
                let mut state = SliceJobState::default();
                state.resolve(outcome);
                self.apply(job, &specification, &state, submitted);
                match state {
                    SliceJobState::Yielded(result) => Submission::Yielded(result),
                    SliceJobState::Failed(error) => Submission::Failed(error),
                    SliceJobState::Pending => Submission::Pending(job),
                }
            }
            Some(pool) => {
                let sender = self.sender.clone();
                let arena = Arc::clone(&self.arena);
                let worker_spec = Arc::clone(&specification);
                pool.spawn(move || {
                    let outcome = run_kernel(&worker_spec, &arena);
                    // The receiver is gone only after shutdown.
                    let _ = sender.send(Completion { job, outcome });
                });

                self.pending.insert(
                    job,
                    InFlight {
                        specification,
                        state: SliceJobState::Pending,
                        submitted: Instant::now(),
                    },
                );
                self.pending_targets.insert(target);
                Submission::Pending(job)
            }
        }
    }

    /// Apply every job that finished since the last tick. Returns how many
    /// were applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            if self.complete(completion) {
                applied += 1;
            }
        }
        applied
    }

    /// Block until every pending job is applied or `timeout` elapses.
    /// Returns false on timeout.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(completion) => {
                    self.complete(completion);
                }
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => return self.pending.is_empty(),
            }
        }
        true
    }

    /// Drop every pending job without applying it
    pub fn shutdown(&mut self) {
        if !self.pending.is_empty() {
            let mut jobs: Vec<JobId> = self.pending.keys().copied().collect();
            jobs.sort_unstable();
            tracing::warn!(discarded = jobs.len(), ?jobs, "Discarding pending slice jobs");
        }
        self.pending.clear();
        self.pending_targets.clear();
        tracing::info!("Slice scheduler shut down");
    }

    fn complete(&mut self, completion: Completion) -> bool {
        let Some(mut in_flight) = self.pending.remove(&completion.job) else {
            tracing::debug!(job = completion.job, "completion for a discarded job");
            return false;
        };
        in_flight.state.resolve(completion.outcome);
        self.pending_targets.remove(&in_flight.specification.target);
        self.apply(
            completion.job,
            &in_flight.specification,
            &in_flight.state,
            in_flight.submitted,
        );
        true
    }

    fn admission(&self, target: TargetId) -> Option<Submission> {
        if self.registry.is_retired(target) {
            tracing::warn!(target_id = %target, "target already retired");
            return Some(Submission::Rejected(RejectReason::Retired));
        }
        if self.pending_targets.contains(&target) {
            tracing::debug!(target_id = %target, "ignoring duplicate cut request");
            return Some(Submission::Rejected(RejectReason::Duplicate));
        }
        None
    }

    /// Hand a terminal job to the target's handlers, once
    fn apply(
        &mut self,
        job: JobId,
        specification: &SliceJobSpecification,
        state: &SliceJobState,
        submitted: Instant,
    ) {
        let target = specification.target;
        let handlers = self
            .registry
            .get(target)
            .map(|t| t.handlers.clone())
            .unwrap_or_default();

        match state {
            SliceJobState::Yielded(result) => {
                if specification.destroy_original {
                    self.registry.retire(target);
                }
                let event = SliceEvent {
                    target,
                    specification,
                    result: result.as_ref(),
                };
                for handler in &handlers {
                    handler.on_sliced(&event);
                }
                tracing::info!(
                    job,
                    target_id = %target,
                    joint = %specification.joint,
                    triangles = result.triangle_count(),
                    handlers = handlers.len(),
                    time_ms = submitted.elapsed().as_millis() as u64,
                    "Applied slice job"
                );
            }
            SliceJobState::Failed(error) => {
                tracing::error!(
                    job,
                    target_id = %target,
                    joint = %specification.joint,
                    error = %error,
                    "Slice job failed"
                );
                for handler in &handlers {
                    handler.on_failed(target, error);
                }
            }
            SliceJobState::Pending => {}
        }
    }
}

impl Drop for SliceScheduler {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            self.shutdown();
        }
    }
}

/// Run the kernel, turning a panic into a failure
fn run_kernel(
    specification: &SliceJobSpecification,
    arena: &SliceArena,
) -> Result<SliceJobYield, SliceError> {
    panic::catch_unwind(AssertUnwindSafe(|| kernel::slice(specification, arena))).unwrap_or_else(
        |payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(SliceError::Panicked(message))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;
    use crate::target::{Addressee, SceneTarget};
    use sever_geometry::Point3;

    fn scheduler() -> SliceScheduler {
        SliceScheduler::new(Config::default()).unwrap()
    }

    #[test]
    fn test_sync_cut_retires_target() {
        let mut scheduler = scheduler();
        let id = scheduler
            .registry_mut()
            .register(demo::two_bone_cylinder(8).unwrap().into_target("arm"));

        let submission = scheduler.sever_by_joint(id, "lower", 0.0, None);
        assert!(matches!(submission, Submission::Yielded(_)));
        assert!(scheduler.registry().is_retired(id));
        assert!(scheduler.is_idle());

        let again = scheduler.sever_by_joint(id, "lower", 0.0, None);
        assert!(matches!(again, Submission::Rejected(RejectReason::Retired)));
    }

    #[test]
    fn test_unknown_target_is_missing_configuration() {
        let mut scheduler = scheduler();
        let request = CutRequest::at(Addressee::Target(TargetId(42)), Point3::origin());
        assert!(matches!(
            scheduler.request_cut(&request),
            Submission::Rejected(RejectReason::MissingConfiguration)
        ));
    }

    #[test]
    fn test_target_without_meshes() {
        let mut scheduler = scheduler();
        let mut target = demo::two_bone_cylinder(8).unwrap().into_target("bare");
        target.snapshots.clear();
        let id = scheduler.registry_mut().register(target);
        assert!(matches!(
            scheduler.sever_by_joint(id, "lower", 0.0, None),
            Submission::Rejected(RejectReason::MissingConfiguration)
        ));
    }

    #[test]
    fn test_unknown_joint_is_missing_configuration() {
        let mut scheduler = scheduler();
        let id = scheduler
            .registry_mut()
            .register(demo::two_bone_cylinder(8).unwrap().into_target("arm"));
        assert!(matches!(
            scheduler.sever_by_joint(id, "wing", 0.0, None),
            Submission::Rejected(RejectReason::MissingConfiguration)
        ));
        assert!(!scheduler.registry().is_retired(id));
    }

    #[test]
    fn test_kernel_errors_pass_through() {
        let rig = demo::two_bone_cylinder(8).unwrap();
        let mut spec = rig.specification("lower", 0.0, None).unwrap();
        spec.joint = "missing".into();
        assert_eq!(
            run_kernel(&spec, &SliceArena::default()).unwrap_err(),
            SliceError::UnknownJoint("missing".into())
        );
    }

    #[test]
    fn test_decision_maker_denies() {
        let mut scheduler = scheduler();
        let target = demo::two_bone_cylinder(8)
            .unwrap()
            .into_target("arm")
            .with_decision_maker(Arc::new(|joint: &str| joint != "lower"));
        let id = scheduler.registry_mut().register(target);

        let request = CutRequest::at(Addressee::Target(id), Point3::new(0.0, 1.2, 0.0));
        assert!(matches!(
            scheduler.request_cut(&request),
            Submission::Rejected(RejectReason::Denied)
        ));
        assert!(!scheduler.registry().is_retired(id));
    }

    #[test]
    fn test_no_severables() {
        let mut scheduler = scheduler();
        let mut target: SceneTarget = demo::two_bone_cylinder(8).unwrap().into_target("arm");
        target.severables.clear();
        let id = scheduler.registry_mut().register(target);
        let request = CutRequest::at(Addressee::Target(id), Point3::new(0.0, 1.2, 0.0));
        assert!(matches!(
            scheduler.request_cut(&request),
            Submission::Rejected(RejectReason::MissingConfiguration)
        ));
    }
}
