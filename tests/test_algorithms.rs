// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_isp::{
    algo::estimator::{WbHyperParams, WbMeasurement, WbProfile, WhiteBalanceEstimator},
    capability::Pipeline,
    context::{IspBuilder, IspContext},
    device::to_ccm_reg,
    error::Result as IspResult,
    iq_param::{IqParam, StatArea},
    protocol::{self, CommandId, SetCommand, ToolLink},
    sim::{Scene, SimCamera},
};
use serial_test::serial;
use std::{
    collections::VecDeque,
    error::Error,
    sync::{Arc, Mutex},
};

fn full_frame() -> StatArea {
    let info = SimCamera::default_sensor();
    StatArea {
        x0: 0,
        y0: 0,
        x_size: info.width,
        y_size: info.height,
    }
}

fn start(camera: &SimCamera, iq: IqParam) -> Result<IspContext, Box<dyn Error>> {
    let mut isp = IspBuilder::new()
        .with_sensor(Box::new(camera.sensor()))
        .with_pipeline(Box::new(camera.pipeline()))
        .with_statistics(Box::new(camera.statistics()))
        .with_iq_param(iq)
        .with_stat_area(full_frame())
        .build()?;
    isp.start()?;
    Ok(isp)
}

fn start_with_tool(camera: &SimCamera, iq: IqParam) -> Result<(IspContext, ToolLink), Box<dyn Error>> {
    let (transport, tool) = protocol::channel(4);
    let mut isp = IspBuilder::new()
        .with_sensor(Box::new(camera.sensor()))
        .with_pipeline(Box::new(camera.pipeline()))
        .with_statistics(Box::new(camera.statistics()))
        .with_iq_param(iq)
        .with_stat_area(full_frame())
        .with_transport(Box::new(transport))
        .build()?;
    isp.start()?;
    Ok((isp, tool))
}

fn run(camera: &SimCamera, isp: &mut IspContext, frames: usize) -> Result<(), Box<dyn Error>> {
    for _ in 0..frames {
        camera.advance_frame();
        isp.on_main_vsync()?;
        isp.background_process()?;
    }
    Ok(())
}

#[test]
#[serial]
fn test_aec_converges_then_stops_writing() -> Result<(), Box<dyn Error>> {
    let camera = SimCamera::default();
    let mut iq = IqParam::default();
    iq.awb_algo.enable = false;
    let mut isp = start(&camera, iq)?;
    let redundant = camera.redundant_sensor_writes();

    run(&camera, &mut isp, 300)?;
    let meta = isp.meta();
    assert_eq!(meta.exposure_target, 56);
    assert!(
        (46..=66).contains(&meta.average_l),
        "average luminance {}",
        meta.average_l
    );
    let (gain, exposure) = camera.effective_settings();
    assert_eq!(gain, 0);
    assert!(exposure > 20_000);

    let writes = camera.sensor_writes();
    run(&camera, &mut isp, 60)?;
    assert_eq!(camera.sensor_writes(), writes);
    assert_eq!(camera.redundant_sensor_writes(), redundant);
    Ok(())
}

#[test]
#[serial]
fn test_aec_follows_exposure_compensation() -> Result<(), Box<dyn Error>> {
    let camera = SimCamera::default();
    let mut iq = IqParam::default();
    iq.awb_algo.enable = false;
    let mut isp = start(&camera, iq)?;
    run(&camera, &mut isp, 300)?;
    let before = isp.meta().average_l;

    isp.set_exposure_target(2)?;
    assert_eq!(isp.exposure_target(), (2, 112));
    run(&camera, &mut isp, 300)?;
    let after = isp.meta().average_l;
    assert!(after > before + 30, "{} -> {}", before, after);
    assert!((102..=122).contains(&after));

    assert!(isp.set_exposure_target(5).is_err());
    assert_eq!(isp.exposure_target(), (2, 112));
    Ok(())
}

/// A neutral scene lit by the TL84 reference of the default profiles.
fn tl84_scene() -> (SimCamera, IqParam) {
    let camera = SimCamera::new(
        SimCamera::default_sensor(),
        Scene {
            luminance: 20.0,
            tint: [220.0 / 180.0, 1.0, 1.0],
        },
        1,
    );
    let mut iq = IqParam::default();
    iq.aec_algo.enable = false;
    iq.sensor_exposure_static = 20_000;
    (camera, iq)
}

#[test]
#[serial]
fn test_awb_applies_profile_once() -> Result<(), Box<dyn Error>> {
    let (camera, iq) = tl84_scene();
    let mut isp = start(&camera, iq)?;
    assert_eq!(camera.color_conv_writes(), 0);

    run(&camera, &mut isp, 100)?;
    assert_eq!(camera.color_conv_writes(), 1);
    assert_eq!(isp.meta().color_temp, 4000);
    let awb = isp.algorithms().awb().ok_or("no AWB")?;
    assert_eq!(awb.color_temp(), 4000);
    assert_eq!(awb.profile_index(), Some(1));
    assert!(!awb.is_oscillating());

    let conv = camera.color_conv().ok_or("colour conversion disabled")?;
    assert_eq!(conv.coeff[0][0], to_ccm_reg(170_000_000));
    assert_eq!(conv.coeff[2][1], to_ccm_reg(-60_000_000));
    assert!(camera.exposure_gain().is_some());

    // identical statistics, converged: no further writes
    run(&camera, &mut isp, 200)?;
    assert_eq!(camera.color_conv_writes(), 1);
    Ok(())
}

/// Replays a fixed sequence of temperatures, then repeats the last one.
struct ScriptedWhiteBalance {
    script: VecDeque<u32>,
    last: u32,
    calls: Arc<Mutex<usize>>,
}

impl WhiteBalanceEstimator for ScriptedWhiteBalance {
    fn init_profiles(&mut self, _: &[WbProfile], _: &[f32], _: WbHyperParams) -> IspResult<()> {
        Ok(())
    }

    fn run(&mut self, _: &WbMeasurement) -> IspResult<u32> {
        if let Some(temp) = self.script.pop_front() {
            self.last = temp;
        }
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        Ok(self.last)
    }
}

#[test]
#[serial]
fn test_awb_oscillation_guard() -> Result<(), Box<dyn Error>> {
    let (camera, iq) = tl84_scene();
    let calls = Arc::new(Mutex::new(0));
    let estimator = ScriptedWhiteBalance {
        script: VecDeque::from([4000, 6500, 4000, 6500]),
        last: 0,
        calls: calls.clone(),
    };
    let mut isp = IspBuilder::new()
        .with_sensor(Box::new(camera.sensor()))
        .with_pipeline(Box::new(camera.pipeline()))
        .with_statistics(Box::new(camera.statistics()))
        .with_white_balance_estimator(Box::new(estimator))
        .with_iq_param(iq)
        .with_stat_area(full_frame())
        .build()?;
    isp.start()?;
    let calls = move || calls.lock().map(|c| *c).unwrap_or_default();

    // one frame at a time until the estimator has run `n` times
    let run_until = |isp: &mut IspContext, n: usize| -> Result<(), Box<dyn Error>> {
        for _ in 0..200 {
            if calls() >= n {
                return Ok(());
            }
            run(&camera, isp, 1)?;
        }
        Err(format!("estimator ran {} times, expected {}", calls(), n).into())
    };

    run_until(&mut isp, 2)?;
    assert_eq!(camera.color_conv_writes(), 2);
    assert_eq!(isp.meta().color_temp, 6500);

    // back to the temperature selected two steps ago
    run_until(&mut isp, 3)?;
    let awb = isp.algorithms().awb().ok_or("no AWB")?;
    assert!(awb.is_oscillating());
    assert_eq!(awb.color_temp(), 6500);
    assert_eq!(camera.color_conv_writes(), 2);

    // the estimate settles on the applied temperature
    run_until(&mut isp, 4)?;
    let awb = isp.algorithms().awb().ok_or("no AWB")?;
    assert!(!awb.is_oscillating());
    assert_eq!(camera.color_conv_writes(), 2);

    run(&camera, &mut isp, 100)?;
    assert_eq!(camera.color_conv_writes(), 2);
    assert_eq!(isp.meta().color_temp, 6500);
    Ok(())
}

#[test]
#[serial]
fn test_awb_reconfigure_reapplies() -> Result<(), Box<dyn Error>> {
    let (camera, iq) = tl84_scene();
    let (mut isp, tool) = start_with_tool(&camera, iq)?;
    run(&camera, &mut isp, 100)?;
    assert_eq!(camera.color_conv_writes(), 1);

    let awb = isp.iq_param().awb_algo.clone();
    tool.send(SetCommand::AwbAlgo(awb).to_packet())?;
    run(&camera, &mut isp, 100)?;
    assert_eq!(camera.color_conv_writes(), 2);
    assert_eq!(isp.meta().color_temp, 4000);
    assert_eq!(tool.drain()?, vec![vec![0x80, CommandId::AwbAlgo as u8, 0, 0]]);
    Ok(())
}

#[test]
#[serial]
fn test_manual_white_balance() -> Result<(), Box<dyn Error>> {
    let (camera, iq) = tl84_scene();
    let mut isp = start(&camera, iq)?;
    run(&camera, &mut isp, 50)?;
    assert_eq!(isp.list_wb_ref_modes(), [2800, 4000, 6500, 0, 0]);

    assert!(isp.set_wb_ref_mode(false, 5000).is_err());
    assert_eq!(isp.wb_ref_mode(), (true, 0));

    isp.set_wb_ref_mode(false, 6500)?;
    assert_eq!(isp.wb_ref_mode(), (false, 6500));
    let writes = camera.color_conv_writes();
    let conv = camera.color_conv().ok_or("colour conversion disabled")?;
    assert_eq!(conv.coeff[0][0], to_ccm_reg(160_000_000));

    // AWB stays off
    run(&camera, &mut isp, 100)?;
    assert_eq!(camera.color_conv_writes(), writes);

    isp.set_wb_ref_mode(true, 0)?;
    assert_eq!(isp.wb_ref_mode(), (true, 0));
    run(&camera, &mut isp, 100)?;
    assert_eq!(isp.meta().color_temp, 4000);
    Ok(())
}

#[test]
#[serial]
fn test_sensor_delay_calibration() -> Result<(), Box<dyn Error>> {
    for latency in [1u32, 3] {
        let camera = SimCamera::new(
            SimCamera::default_sensor(),
            Scene::default(),
            latency as usize,
        );
        let mut iq = IqParam::default();
        iq.awb_algo.enable = false;
        let (mut isp, tool) = start_with_tool(&camera, iq)?;

        tool.send(SetCommand::SensorDelay.to_packet())?;
        run(&camera, &mut isp, 150)?;
        assert!(!isp.algorithms().sensor_delay_running());

        let mut report = vec![0x82, CommandId::SensorDelay as u8, 0, 0];
        report.extend_from_slice(&latency.to_le_bytes());
        assert_eq!(
            tool.drain()?,
            vec![vec![0x80, CommandId::SensorDelay as u8, 0, 0], report]
        );
        assert_eq!(isp.iq_param().sensor_delay.delay, latency);
        // the loops are restored afterwards
        assert!(isp.iq_param().aec_algo.enable);
        assert!(!isp.iq_param().awb_algo.enable);
    }
    Ok(())
}

#[test]
#[serial]
fn test_bad_pixel_strength_tracks_threshold() -> Result<(), Box<dyn Error>> {
    let camera = SimCamera::default();
    camera.set_bad_pixel_rate(8);
    let mut iq = IqParam::default();
    iq.awb_algo.enable = false;
    iq.bad_pixel_algo.enable = true;
    iq.bad_pixel_algo.threshold = 20;
    let mut isp = start(&camera, iq)?;
    assert_eq!(camera.pipeline().bad_pixel()?, None);

    // 8 per frame and strength step: settles between 16 and 24
    run(&camera, &mut isp, 200)?;
    let strength = camera.pipeline().bad_pixel()?;
    assert!(matches!(strength, Some(1 | 2)), "strength {:?}", strength);
    Ok(())
}
