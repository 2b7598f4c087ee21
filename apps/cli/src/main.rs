// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sever - slices the demo rig and prints a JSON report.
//!
//! Every hit height is applied to a fresh two-bone tube, since a target is
//! retired by its first successful cut.
//!
//! # Usage
//!
//! - `sever` - one tube with 32 segments, hit just above the elbow
//! - `sever 64 0.3 1.2 1.8` - three tubes with 64 segments, one hit each
//!
//! Scheduler settings come from `SEVER_*` environment variables; set
//! `SEVER_LOG_FORMAT=json` for JSON logs on stderr.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use sever_geometry::Point3;
use sever_processing::{demo, global, Addressee, Config, CutRequest, Submission};

mod report;

use report::{Collector, RequestReport, RunReport};

const DEFAULT_SEGMENTS: usize = 32;
const DEFAULT_HIT_Y: f32 = 1.2;
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const TICK: Duration = Duration::from_millis(1);

fn main() -> Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let segments = match args.next() {
        Some(arg) => arg
            .parse::<usize>()
            .with_context(|| format!("invalid segment count '{}'", arg))?,
        None => DEFAULT_SEGMENTS,
    };
    let mut hits = args
        .map(|arg| {
            arg.parse::<f32>()
                .with_context(|| format!("invalid hit height '{}'", arg))
        })
        .collect::<Result<Vec<_>>>()?;
    if hits.is_empty() {
        hits.push(DEFAULT_HIT_Y);
    }

    let config = Config::from_env();
    tracing::info!(
        worker_mode = ?config.worker_mode,
        worker_threads = config.worker_threads,
        infill_mode = ?config.infill_mode,
        segments,
        hits = hits.len(),
        "Starting Sever"
    );
    let worker_mode = format!("{:?}", config.worker_mode);
    let infill_mode = format!("{:?}", config.infill_mode);

    global::init(config).context("failed to start the slice scheduler")?;
    let start = Instant::now();
    let collector = Collector::default();

    let mut requests = Vec::with_capacity(hits.len());
    for hit_y in hits {
        let target = demo::two_bone_cylinder(segments)
            .context("failed to build the demo rig")?
            .into_target("tube")
            .with_handler(Arc::new(collector.clone()));

        let (id, submission) = global::with_scheduler(|scheduler| {
            let id = scheduler.registry_mut().register(target);
            let request = CutRequest::at(Addressee::Target(id), Point3::new(0.0, hit_y, 0.0));
            (id, scheduler.request_cut(&request))
        })?;

        let outcome = match submission {
            Submission::Rejected(reason) => format!("rejected: {:?}", reason),
            Submission::Pending(job) => format!("pending: job {}", job),
            Submission::Yielded(_) => "yielded".to_string(),
            Submission::Failed(error) => format!("failed: {}", error),
        };
        requests.push(RequestReport {
            hit_y,
            target: id.0,
            outcome,
        });
    }

    let deadline = Instant::now() + IDLE_TIMEOUT;
    loop {
        let idle = global::with_scheduler(|scheduler| {
            scheduler.poll();
            scheduler.is_idle()
        })?;
        if idle {
            break;
        }
        if Instant::now() >= deadline {
            global::shutdown()?;
            bail!("slice jobs did not finish within {:?}", IDLE_TIMEOUT);
        }
        std::thread::sleep(TICK);
    }

    let report = RunReport {
        worker_mode,
        infill_mode,
        segments,
        requests,
        cuts: collector.take(),
        time_ms: start.elapsed().as_millis() as u64,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    global::shutdown()?;
    Ok(())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sever_processing=debug".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if std::env::var("SEVER_LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
