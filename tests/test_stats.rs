// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_isp::{
    capability::{Pipeline, Window},
    error::IspError,
    iq_param::StatArea,
    sim::{Scene, SimCamera},
    stats::{Stage, StatClient, StatGeometry, StatLocation, StatType, StatsEngine},
};
use serial_test::serial;
use std::error::Error;

const SIDE: u32 = 64;

/// A grey scene giving 128 at the initial sensor settings.
fn setup() -> Result<(SimCamera, StatsEngine, StatGeometry), Box<dyn Error>> {
    let camera = SimCamera::new(
        SimCamera::default_sensor(),
        Scene {
            luminance: 12_800.0,
            tint: [1.0; 3],
        },
        1,
    );
    camera.pipeline().set_stat_window(Some(Window {
        x0: 0,
        y0: 0,
        width: SIDE,
        height: SIDE,
    }))?;
    let engine = StatsEngine::new(Box::new(camera.statistics()));
    let geometry = StatGeometry {
        area: StatArea {
            x0: 0,
            y0: 0,
            x_size: SIDE,
            y_size: SIDE,
        },
        ..Default::default()
    };
    Ok((camera, engine, geometry))
}

fn step(camera: &SimCamera, engine: &mut StatsEngine, frame: u32, geometry: &StatGeometry) -> Result<(), Box<dyn Error>> {
    camera.advance_frame();
    engine.tick(frame, geometry)?;
    Ok(())
}

#[test]
#[serial]
fn test_stage_cycle_skips_unrequested() -> Result<(), Box<dyn Error>> {
    let (camera, mut engine, geometry) = setup()?;
    engine.get_next(0, StatClient::Tool, StatLocation::Down, StatType::AVG_AND_BINS, 0)?;

    let mut programmed = Vec::new();
    for frame in 1..=12 {
        programmed.push(engine.stage());
        step(&camera, &mut engine, frame, &geometry)?;
    }
    assert_eq!(
        programmed,
        vec![
            Stage::UpAvg,
            Stage::DownAvg,
            Stage::DownBins0To2,
            Stage::DownBins3To5,
            Stage::DownBins6To8,
            Stage::DownBins9To11,
            Stage::DownAvg,
            Stage::DownBins0To2,
            Stage::DownBins3To5,
            Stage::DownBins6To8,
            Stage::DownBins9To11,
            Stage::DownAvg,
        ]
    );
    assert_eq!(engine.request_mask(StatLocation::Up), StatType::NONE);
    Ok(())
}

#[test]
#[serial]
fn test_nothing_requested_stays_on_up_avg() -> Result<(), Box<dyn Error>> {
    let (camera, mut engine, geometry) = setup()?;
    for frame in 1..=5 {
        step(&camera, &mut engine, frame, &geometry)?;
        assert_eq!(engine.stage(), Stage::UpAvg);
    }
    assert_eq!(engine.latest().up_start, None);
    assert_eq!(engine.latest().down_start, None);
    Ok(())
}

#[test]
#[serial]
fn test_no_partial_publish() -> Result<(), Box<dyn Error>> {
    let (camera, mut engine, geometry) = setup()?;
    engine.get_next(0, StatClient::Tool, StatLocation::Down, StatType::AVG_AND_BINS, 0)?;

    // DownAvg is programmed on frame 2 and read on frame 4, the last bin
    // triplet is read on frame 8
    for frame in 1..=7 {
        step(&camera, &mut engine, frame, &geometry)?;
        assert_eq!(engine.latest().down_start, None, "frame {}", frame);
        assert!(engine.process_callbacks().is_empty());
    }
    step(&camera, &mut engine, 8, &geometry)?;

    let last = engine.latest();
    assert_eq!(last.down_start, Some(4));
    assert_eq!(last.down_end, Some(8));
    assert_eq!(last.down.average_r, 128);
    assert_eq!(last.down.average_l, 128);
    let mut expected = [0; 12];
    // 128 * 12 / 256
    expected[6] = SIDE * SIDE;
    assert_eq!(last.down.histogram, expected);

    let deliveries = engine.process_callbacks();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].client, StatClient::Tool);
    assert_eq!(deliveries[0].snapshot, last);
    assert_eq!(engine.registered(), 0);
    Ok(())
}

#[test]
#[serial]
fn test_delivery_waits_for_target_frame() -> Result<(), Box<dyn Error>> {
    let (camera, mut engine, geometry) = setup()?;
    engine.get_next(0, StatClient::Tool, StatLocation::Down, StatType::AVG, 6)?;

    let mut delivered_at = None;
    for frame in 1..=12 {
        step(&camera, &mut engine, frame, &geometry)?;
        if !engine.process_callbacks().is_empty() {
            delivered_at = Some(frame);
            break;
        }
    }
    // an averages-only cycle publishes every frame from frame 4 on
    assert_eq!(delivered_at, Some(6));
    assert!(engine.latest().down_start.is_some_and(|s| s >= 6));
    Ok(())
}

#[test]
#[serial]
fn test_registry_full_has_no_side_effect() -> Result<(), Box<dyn Error>> {
    let (_camera, mut engine, _) = setup()?;
    for _ in 0..5 {
        engine.get_next(0, StatClient::Tool, StatLocation::Up, StatType::AVG, 1)?;
    }
    let err = engine
        .get_next(0, StatClient::Tool, StatLocation::Down, StatType::ALL, 1)
        .unwrap_err();
    assert!(matches!(err, IspError::ResourceExhausted));
    assert_eq!(engine.request_mask(StatLocation::Down), StatType::NONE);
    assert!(!engine.request_all_active());
    assert_eq!(engine.registered(), 5);
    Ok(())
}

#[test]
#[serial]
fn test_cancelled_ticket_is_inert() -> Result<(), Box<dyn Error>> {
    let (_camera, mut engine, _) = setup()?;
    let first = engine.get_next(0, StatClient::Tool, StatLocation::Up, StatType::AVG, 1)?;
    assert!(engine.cancel(first));
    assert!(!engine.cancel(first));

    // the freed slot is reused with a new generation
    let second = engine.get_next(0, StatClient::Tool, StatLocation::Up, StatType::AVG, 1)?;
    assert!(!engine.cancel(first));
    assert!(engine.cancel(second));
    assert_eq!(engine.registered(), 0);
    Ok(())
}

#[test]
#[serial]
fn test_request_all_runs_full_cycle() -> Result<(), Box<dyn Error>> {
    let (camera, mut engine, geometry) = setup()?;
    engine.get_next(0, StatClient::Tool, StatLocation::Up, StatType::ALL, 0)?;
    assert!(engine.request_all_active());

    let mut programmed = Vec::new();
    for frame in 1..=10 {
        programmed.push(engine.stage());
        step(&camera, &mut engine, frame, &geometry)?;
    }
    assert_eq!(programmed, Stage::ALL.to_vec());

    // the override lapses after three cycles, nothing stays requested
    for frame in 11..=40 {
        step(&camera, &mut engine, frame, &geometry)?;
    }
    assert!(!engine.request_all_active());
    assert_eq!(engine.request_mask(StatLocation::Up), StatType::NONE);
    Ok(())
}
