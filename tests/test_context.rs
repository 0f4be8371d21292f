// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_isp::{
    context::IspBuilder,
    error::{IspError, Status},
    iq_param::{IqParam, StatArea},
    sim::SimCamera,
};
use serial_test::serial;
use std::error::Error;

#[test]
#[serial]
fn test_build_requires_capabilities() -> Result<(), Box<dyn Error>> {
    let camera = SimCamera::default();
    let err = IspBuilder::new()
        .with_sensor(Box::new(camera.sensor()))
        .with_statistics(Box::new(camera.statistics()))
        .build()
        .err()
        .ok_or("built without a pipeline")?;
    assert!(matches!(err, IspError::MissingCapability("pipeline")));
    assert_eq!(err.status(), Status::AppHelperUndefined);
    Ok(())
}

#[test]
#[serial]
fn test_build_rejects_invalid_iq_param() -> Result<(), Box<dyn Error>> {
    let camera = SimCamera::default();
    let mut iq = IqParam::default();
    iq.aec_algo.exposure_compensation = 7;
    let err = IspBuilder::new()
        .with_sensor(Box::new(camera.sensor()))
        .with_pipeline(Box::new(camera.pipeline()))
        .with_statistics(Box::new(camera.statistics()))
        .with_iq_param(iq)
        .build()
        .err()
        .ok_or("built with an invalid compensation")?;
    assert_eq!(err.status(), Status::IqParamInvalid);
    Ok(())
}

#[test]
#[serial]
fn test_start_needs_stat_area() -> Result<(), Box<dyn Error>> {
    let camera = SimCamera::default();
    let mut isp = IspBuilder::new()
        .with_sensor(Box::new(camera.sensor()))
        .with_pipeline(Box::new(camera.pipeline()))
        .with_statistics(Box::new(camera.statistics()))
        .build()?;
    let err = isp.start().err().ok_or("started without a statistic area")?;
    assert_eq!(err.status(), Status::StatAreaInvalid);
    Ok(())
}

#[test]
#[serial]
fn test_start_uses_iq_stat_area() -> Result<(), Box<dyn Error>> {
    let camera = SimCamera::default();
    let area = StatArea {
        x0: 480,
        y0: 270,
        x_size: 960,
        y_size: 540,
    };
    let mut iq = IqParam::default();
    iq.stat_area_static = area;
    let mut isp = IspBuilder::new()
        .with_sensor(Box::new(camera.sensor()))
        .with_pipeline(Box::new(camera.pipeline()))
        .with_statistics(Box::new(camera.statistics()))
        .with_iq_param(iq)
        .build()?;
    isp.start()?;
    assert_eq!(isp.stat_area()?, area);
    Ok(())
}

#[test]
#[serial]
fn test_start_waits_for_pipeline() -> Result<(), Box<dyn Error>> {
    let camera = SimCamera::default();
    camera.set_ready(false);
    let mut isp = IspBuilder::new()
        .with_sensor(Box::new(camera.sensor()))
        .with_pipeline(Box::new(camera.pipeline()))
        .with_statistics(Box::new(camera.statistics()))
        .with_stat_area(StatArea {
            x0: 0,
            y0: 0,
            x_size: 640,
            y_size: 480,
        })
        .build()?;
    let err = isp.start().err().ok_or("started on a stopped pipeline")?;
    assert_eq!(err.status(), Status::DcmippState);

    camera.set_ready(true);
    isp.start()?;
    Ok(())
}
