// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_isp::{
    context::IspBuilder,
    iq_param::{BlackLevel, IqParam, StatArea},
    protocol::{self, dump_chunks, get_request, CommandId, SetCommand},
    sim::SimCamera,
};

pub fn benchmark_commands(c: &mut Criterion) {
    let camera = SimCamera::default();
    let (transport, tool) = protocol::channel(4);
    let mut iq = IqParam::default();
    iq.aec_algo.enable = false;
    iq.awb_algo.enable = false;
    let mut isp = IspBuilder::new()
        .with_sensor(Box::new(camera.sensor()))
        .with_pipeline(Box::new(camera.pipeline()))
        .with_statistics(Box::new(camera.statistics()))
        .with_app_helpers(Box::new(camera.helpers()))
        .with_iq_param(iq)
        .with_stat_area(StatArea {
            x0: 0,
            y0: 0,
            x_size: 640,
            y_size: 480,
        })
        .with_transport(Box::new(transport))
        .build()
        .unwrap();
    isp.start().unwrap();

    let level = BlackLevel {
        enable: true,
        r: 16,
        g: 16,
        b: 16,
    };
    let commands = [
        ("set_black_level", SetCommand::BlackLevelStatic(level).to_packet()),
        ("get_black_level", get_request(CommandId::BlackLevelStatic)),
        ("get_sensor_info", get_request(CommandId::SensorInfo)),
        ("get_wb_ref_modes", get_request(CommandId::UserListWbRefModes)),
    ];

    let mut group = c.benchmark_group("protocol/command");
    for (name, packet) in commands {
        group.bench_function(name, |b| {
            b.iter(|| {
                tool.send(packet.clone()).unwrap();
                isp.background_process().unwrap();
                tool.drain().unwrap()
            })
        });
    }
    group.finish();
}

pub fn benchmark_dump_chunks(c: &mut Criterion) {
    let sizes = [(160, 120), (640, 480), (1920, 1080)];
    let mut group = c.benchmark_group("protocol/dump");
    for (width, height) in sizes {
        let frame = vec![0x5au8; width * height * 3];
        group.bench_with_input(format!("{}x{}", width, height), &frame, |b, frame| {
            b.iter(|| {
                dump_chunks(frame)
                    .iter()
                    .map(|chunk| chunk.to_packet().len())
                    .sum::<usize>()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_commands, benchmark_dump_chunks);
criterion_main!(benches);
