// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The process-wide scheduler
//!
//! Created by [`init`] and torn down by [`shutdown`]; nothing is created
//! lazily.

use std::sync::{Mutex, MutexGuard};

use crate::config::Config;
use crate::error::SchedulerError;
use crate::scheduler::SliceScheduler;

static SCHEDULER: Mutex<Option<SliceScheduler>> = Mutex::new(None);

fn lock() -> MutexGuard<'static, Option<SliceScheduler>> {
    SCHEDULER.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn init(config: Config) -> Result<(), SchedulerError> {
    let mut slot = lock();
    if slot.is_some() {
        return Err(SchedulerError::AlreadyInitialized);
    }
    *slot = Some(SliceScheduler::new(config)?);
    Ok(())
}

/// Run `f` against the global scheduler
pub fn with_scheduler<R>(f: impl FnOnce(&mut SliceScheduler) -> R) -> Result<R, SchedulerError> {
    let mut slot = lock();
    let scheduler = slot.as_mut().ok_or(SchedulerError::NotInitialized)?;
    Ok(f(scheduler))
}

pub fn is_initialized() -> bool {
    lock().is_some()
}

/// Tear the scheduler down, discarding pending jobs
pub fn shutdown() -> Result<(), SchedulerError> {
    let mut scheduler = lock().take().ok_or(SchedulerError::NotInitialized)?;
    scheduler.shutdown();
    Ok(())
}
