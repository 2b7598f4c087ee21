// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Benchmark of one full slice through the demo tube.
//!
//! Compares:
//! 1. Sloppy infill at increasing ring resolution
//! 2. Meticulous infill at the same resolutions
//!
//! Run with: cargo bench -p sever-processing --bench slice

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sever_geometry::{InfillMode, SliceArena};
use sever_processing::demo::two_bone_cylinder;
use sever_processing::kernel::slice;

fn bench_slice(c: &mut Criterion) {
    let mut group = c.benchmark_group("slice");
    let arena = SliceArena::default();

    for segments in [16usize, 64, 256] {
        let rig = match two_bone_cylinder(segments) {
            Ok(rig) => rig,
            Err(e) => panic!("demo rig failed: {}", e),
        };
        group.throughput(Throughput::Elements(rig.snapshot.triangle_count() as u64));

        for mode in [InfillMode::Sloppy, InfillMode::Meticulous] {
            let mut spec = match rig.specification("lower", 0.25, None) {
                Ok(spec) => spec,
                Err(e) => panic!("demo specification failed: {}", e),
            };
            spec.infill_mode = mode;

            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", mode), segments),
                &spec,
                |b, spec| b.iter(|| black_box(slice(spec, &arena))),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_slice);
criterion_main!(benches);
