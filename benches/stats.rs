// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_isp::{
    iq_param::StatArea,
    sim::SimCamera,
    stats::{StatClient, StatGeometry, StatLocation, StatType, StatsEngine},
};

pub fn benchmark_cycle(c: &mut Criterion) {
    let info = SimCamera::default_sensor();
    let geometry = StatGeometry {
        area: StatArea {
            x0: 0,
            y0: 0,
            x_size: info.width,
            y_size: info.height,
        },
        ..Default::default()
    };
    let requests = [
        ("avg", StatType::AVG),
        ("bins", StatType::AVG_AND_BINS),
        ("all", StatType::ALL),
    ];

    let mut group = c.benchmark_group("stats/cycle");
    for (name, kind) in requests {
        let camera = SimCamera::default();
        let mut engine = StatsEngine::new(Box::new(camera.statistics()));
        let mut frame = 0u32;
        group.bench_function(name, |b| {
            b.iter(|| {
                if engine.registered() == 0 {
                    engine
                        .get_next(frame, StatClient::Tool, StatLocation::Down, kind, 0)
                        .unwrap();
                }
                frame += 1;
                camera.advance_frame();
                engine.tick(frame, &geometry).unwrap();
                engine.process_callbacks()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_cycle);
criterion_main!(benches);
