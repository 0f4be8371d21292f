// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The ISP context and its builder.
//!
//! [`IspContext`] owns the hardware facade, the statistics engine, the IQ
//! parameter cache and the algorithms. The host drives it from exactly two
//! call sites which must never run concurrently:
//!
//! - [`IspContext::on_main_vsync`] once per frame of the main pipe,
//! - [`IspContext::background_process`] from the application main loop.
//!
//! ```no_run
//! # use edgefirst_isp::{context::IspBuilder, iq_param::StatArea, sim::SimCamera};
//! # fn main() -> Result<(), edgefirst_isp::error::IspError> {
//! let camera = SimCamera::default();
//! let mut isp = IspBuilder::new()
//!     .with_sensor(Box::new(camera.sensor()))
//!     .with_pipeline(Box::new(camera.pipeline()))
//!     .with_statistics(Box::new(camera.statistics()))
//!     .with_stat_area(StatArea { x0: 0, y0: 0, x_size: 1920, y_size: 1080 })
//!     .build()?;
//! isp.start()?;
//! loop {
//!     camera.advance_frame();
//!     isp.on_main_vsync()?;
//!     isp.background_process()?;
//! }
//! # }
//! ```

use crate::{
    algo::{
        aec::{self, Aec},
        awb::Awb,
        estimator::{ExposureEstimator, WhiteBalanceEstimator},
        AlgoEnv, AlgoScheduler, IspMeta,
    },
    capability::{AppHelpers, BayerPattern, NoAppHelpers, Pipeline, Sensor, SensorInfo, StatisticsBlock},
    device::{select_decimation, Device},
    error::{Block, IspError, Result},
    iq_param::{ColorConv, DecimationFactor, IqParam, IspGain, StatArea, AWB_MAX_PROFILES},
    protocol::{process_command, sensor_delay_reply, statistics_reply, Transport},
    stats::{StatClient, StatGeometry, StatSnapshot, StatsEngine},
};
use tracing::{debug, info, trace};

/// Collects the capabilities and configuration of an [`IspContext`].
#[derive(Default)]
pub struct IspBuilder {
    sensor: Option<Box<dyn Sensor>>,
    pipeline: Option<Box<dyn Pipeline>>,
    statistics: Option<Box<dyn StatisticsBlock>>,
    helpers: Option<Box<dyn AppHelpers>>,
    iq_param: IqParam,
    stat_area: StatArea,
    camera_instance: u32,
    exposure_estimator: Option<Box<dyn ExposureEstimator>>,
    white_balance_estimator: Option<Box<dyn WhiteBalanceEstimator>>,
    transport: Option<Box<dyn Transport>>,
}

impl IspBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensor(mut self, sensor: Box<dyn Sensor>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn with_pipeline(mut self, pipeline: Box<dyn Pipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_statistics(mut self, statistics: Box<dyn StatisticsBlock>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Optional preview and dump services.
    pub fn with_app_helpers(mut self, helpers: Box<dyn AppHelpers>) -> Self {
        self.helpers = Some(helpers);
        self
    }

    /// Tuning blob to seed the IQ parameter cache with, the built-in
    /// defaults otherwise.
    pub fn with_iq_param(mut self, iq_param: IqParam) -> Self {
        self.iq_param = iq_param;
        self
    }

    /// Statistic area chosen by the application. An empty area selects the
    /// static area of the IQ parameters at start.
    pub fn with_stat_area(mut self, area: StatArea) -> Self {
        self.stat_area = area;
        self
    }

    pub fn with_camera_instance(mut self, instance: u32) -> Self {
        self.camera_instance = instance;
        self
    }

    pub fn with_exposure_estimator(mut self, estimator: Box<dyn ExposureEstimator>) -> Self {
        self.exposure_estimator = Some(estimator);
        self
    }

    pub fn with_white_balance_estimator(mut self, estimator: Box<dyn WhiteBalanceEstimator>) -> Self {
        self.white_balance_estimator = Some(estimator);
        self
    }

    /// Link to the remote tuning tool.
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Initialize the ISP: read the sensor, select and program the
    /// decimation, initialize the algorithms and the statistics engine.
    ///
    /// # Errors
    ///
    /// [`IspError::MissingCapability`] when the sensor, pipeline or
    /// statistics capability was not provided, otherwise the first failing
    /// initialization step.
    pub fn build(self) -> Result<IspContext> {
        let sensor = self.sensor.ok_or(IspError::MissingCapability("sensor"))?;
        let pipeline = self
            .pipeline
            .ok_or(IspError::MissingCapability("pipeline"))?;
        let statistics = self
            .statistics
            .ok_or(IspError::MissingCapability("statistics"))?;
        let helpers = self.helpers.unwrap_or_else(|| Box::new(NoAppHelpers));

        self.iq_param.validate()?;
        let mut device = Device::new(sensor, pipeline, helpers)?;
        let decimation = select_decimation(device.sensor_info().width)?;
        device.set_decimation(decimation)?;
        debug!("decimation {:?}", decimation);

        let aec = self.exposure_estimator.map(Aec::new).unwrap_or_default();
        let awb = self
            .white_balance_estimator
            .map(Awb::new)
            .unwrap_or_default();

        let mut ctx = IspContext {
            device,
            stats: StatsEngine::new(statistics),
            iq: self.iq_param,
            meta: IspMeta::default(),
            algos: AlgoScheduler::new(aec, awb),
            stat_area: self.stat_area,
            camera_instance: self.camera_instance,
            main_frame_id: 0,
            ancillary_frame_id: 0,
            dump_frame_id: 0,
            wb_ref_temp: 0,
            transport: self.transport,
        };
        let frame_id = ctx.main_frame_id;
        ctx.algos.init(&mut AlgoEnv {
            device: &mut ctx.device,
            stats: &mut ctx.stats,
            iq: &mut ctx.iq,
            meta: &mut ctx.meta,
            frame_id,
        })?;
        ctx.stats.reset();

        info!(
            "ISP {} initialized for {} {}x{}",
            ctx.camera_instance,
            ctx.device.sensor_info().name,
            ctx.device.sensor_info().width,
            ctx.device.sensor_info().height
        );
        Ok(ctx)
    }
}

/// A running ISP instance.
pub struct IspContext {
    pub(crate) device: Device,
    pub(crate) stats: StatsEngine,
    pub(crate) iq: IqParam,
    pub(crate) meta: IspMeta,
    pub(crate) algos: AlgoScheduler,
    stat_area: StatArea,
    camera_instance: u32,
    main_frame_id: u32,
    ancillary_frame_id: u32,
    dump_frame_id: u32,
    wb_ref_temp: u32,
    transport: Option<Box<dyn Transport>>,
}

impl IspContext {
    /// Apply the static configuration of the IQ parameters.
    ///
    /// Sensor gain and exposure are only applied while AEC is disabled, ISP
    /// gain and colour conversion only while AWB is disabled.
    pub fn start(&mut self) -> Result<()> {
        self.device.check_ready()?;

        let iq = &self.iq;
        self.device.set_demosaicing(&iq.demosaicing)?;
        self.device.set_stat_removal(&iq.stat_removal)?;
        self.device.set_contrast(&iq.contrast)?;

        if !iq.aec_algo.enable {
            if iq.sensor_gain_static != 0 {
                self.device.set_sensor_gain(iq.sensor_gain_static)?;
            }
            if iq.sensor_exposure_static != 0 {
                self.device.set_sensor_exposure(iq.sensor_exposure_static)?;
            }
        }
        if iq.bad_pixel_static.enable {
            self.device.set_bad_pixel(&iq.bad_pixel_static)?;
        }
        if iq.black_level_static.enable {
            self.device.set_black_level(&iq.black_level_static)?;
        }
        if !iq.awb_algo.enable {
            if iq.isp_gain_static.enable {
                self.device.set_isp_gain(&iq.isp_gain_static)?;
            }
            if iq.color_conv_static.enable {
                self.device.set_color_conv(&iq.color_conv_static)?;
            }
        }

        if self.stat_area.is_empty() {
            self.stat_area = iq.stat_area_static;
        }
        self.device.set_stat_area(&self.stat_area)?;
        self.device.set_gamma(&iq.gamma)?;

        let compensation = self.iq.aec_algo.exposure_compensation;
        self.iq.aec_algo.exposure_target = aec::exposure_target(compensation);
        info!(
            "ISP started, stat area {:?}, exposure target {}",
            self.stat_area, self.iq.aec_algo.exposure_target
        );
        Ok(())
    }

    /// Stop the algorithms and drop every statistics registration.
    pub fn deinit(&mut self) -> Result<()> {
        let frame_id = self.main_frame_id;
        let result = self.algos.deinit(&mut AlgoEnv {
            device: &mut self.device,
            stats: &mut self.stats,
            iq: &mut self.iq,
            meta: &mut self.meta,
            frame_id,
        });
        self.stats.cancel_all();
        info!("ISP {} de-initialized", self.camera_instance);
        result
    }

    /// Main pipe VSYNC: count the frame and advance the statistics cycle.
    pub fn on_main_vsync(&mut self) -> Result<()> {
        self.main_frame_id = self.main_frame_id.wrapping_add(1);
        let geometry = StatGeometry {
            area: self.stat_area,
            decimation: self.device.decimation().value(),
            mono: self.device.sensor_info().bayer_pattern == BayerPattern::Mono
                || !self.iq.demosaicing.enable,
        };
        self.stats.tick(self.main_frame_id, &geometry)
    }

    pub fn on_ancillary_frame(&mut self) {
        self.ancillary_frame_id = self.ancillary_frame_id.wrapping_add(1);
    }

    pub fn on_dump_frame(&mut self) {
        self.dump_frame_id = self.dump_frame_id.wrapping_add(1);
    }

    /// Serve the tuning tool, hand completed statistics to their clients
    /// and run one step of every algorithm.
    ///
    /// # Errors
    ///
    /// Every stage runs even when an earlier one failed. The command error
    /// takes precedence over a statistics delivery error, which takes
    /// precedence over an algorithm error.
    pub fn background_process(&mut self) -> Result<()> {
        let command = self.serve_command();
        let delivered = self.dispatch_statistics();
        let algorithms = self.run_algorithms();
        let reported = match self.algos.take_sensor_delay_report() {
            Some(delay) => self.send(&sensor_delay_reply(delay)),
            None => Ok(()),
        };
        command.and(delivered).and(algorithms).and(reported)
    }

    fn serve_command(&mut self) -> Result<()> {
        let Some(mut transport) = self.transport.take() else {
            return Ok(());
        };
        let result = match transport.pending().map(<[u8]>::to_vec) {
            Some(cmd) => {
                let mut replies = Vec::new();
                let processed = process_command(self, &cmd, &mut replies);
                transport.release();
                let sent = replies.iter().try_for_each(|packet| transport.send(packet));
                processed.and(sent)
            }
            None => Ok(()),
        };
        self.transport = Some(transport);
        result
    }

    fn send(&mut self, packet: &[u8]) -> Result<()> {
        match self.transport.as_mut() {
            Some(transport) => transport.send(packet),
            None => {
                trace!("no tuning tool, dropped {} byte packet", packet.len());
                Ok(())
            }
        }
    }

    fn dispatch_statistics(&mut self) -> Result<()> {
        let mut result = Ok(());
        for delivery in self.stats.process_callbacks() {
            match delivery.client {
                StatClient::Algo(id) => self.algos.deliver(id, delivery.snapshot),
                StatClient::Tool => {
                    let packet = statistics_reply(delivery.location, &delivery.snapshot);
                    result = result.and(self.send(&packet));
                }
            }
        }
        result
    }

    fn run_algorithms(&mut self) -> Result<()> {
        self.algos.process(&mut AlgoEnv {
            device: &mut self.device,
            stats: &mut self.stats,
            iq: &mut self.iq,
            meta: &mut self.meta,
            frame_id: self.main_frame_id,
        })
    }

    /// Select an exposure compensation in half-EV steps.
    pub fn set_exposure_target(&mut self, compensation: i32) -> Result<()> {
        if !(-4..=4).contains(&compensation) {
            return Err(IspError::InvalidParameter(Block::IqParam));
        }
        let aec = &mut self.iq.aec_algo;
        aec.exposure_compensation = compensation;
        aec.exposure_target = aec::exposure_target(compensation);
        debug!("exposure target {} ({:+})", aec.exposure_target, compensation);
        Ok(())
    }

    /// Exposure compensation and the resulting target luminance.
    pub fn exposure_target(&self) -> (i32, u32) {
        let aec = &self.iq.aec_algo;
        (aec.exposure_compensation, aec.exposure_target)
    }

    /// Start or stop AEC. Takes effect on the next background process.
    pub fn set_aec_state(&mut self, enable: bool) {
        self.iq.aec_algo.enable = enable;
    }

    pub fn aec_state(&self) -> bool {
        self.iq.aec_algo.enable
    }

    /// Reference temperatures of the white balance profiles, zero padded.
    pub fn list_wb_ref_modes(&self) -> [u32; AWB_MAX_PROFILES] {
        self.iq.awb_algo.reference_temps()
    }

    /// Select automatic white balance, or stop AWB and apply the profile of
    /// `color_temp`.
    ///
    /// # Errors
    ///
    /// [`IspError::UnknownColorTemperature`] when no profile has that
    /// reference temperature.
    pub fn set_wb_ref_mode(&mut self, automatic: bool, color_temp: u32) -> Result<()> {
        if automatic {
            debug!("white balance automatic");
            self.iq.awb_algo.enable = true;
            return Ok(());
        }
        let profile = match self.iq.awb_algo.profile(color_temp) {
            Some((_, profile)) if color_temp != 0 => profile.clone(),
            _ => return Err(IspError::UnknownColorTemperature(color_temp)),
        };
        self.iq.awb_algo.enable = false;
        self.device.set_isp_gain(&IspGain {
            enable: true,
            r: profile.gain_r,
            g: profile.gain_g,
            b: profile.gain_b,
        })?;
        self.device.set_color_conv(&ColorConv {
            enable: true,
            coeff: profile.coeff,
            offset: profile.offset,
        })?;
        self.wb_ref_temp = color_temp;
        info!("white balance fixed to {} ({}K)", profile.id, color_temp);
        Ok(())
    }

    /// Whether AWB runs, and the manual reference temperature otherwise.
    pub fn wb_ref_mode(&self) -> (bool, u32) {
        let automatic = self.iq.awb_algo.enable;
        (automatic, if automatic { 0 } else { self.wb_ref_temp })
    }

    pub fn decimation_factor(&self) -> DecimationFactor {
        self.device.decimation()
    }

    /// Program a new statistic area, in sensor coordinates.
    pub fn set_stat_area(&mut self, area: &StatArea) -> Result<()> {
        self.device.set_stat_area(area)?;
        debug!("statistic area {:?}", area);
        self.stat_area = *area;
        Ok(())
    }

    /// Statistic area as programmed in hardware.
    pub fn stat_area(&self) -> Result<StatArea> {
        self.device.stat_area()
    }

    /// Most recently completed statistics.
    pub fn latest_stats(&self) -> StatSnapshot {
        self.stats.latest()
    }

    /// Values of the last algorithm runs.
    pub fn meta(&self) -> IspMeta {
        self.meta
    }

    /// Measure the sensor delay on the next background process.
    pub fn arm_sensor_delay_calibration(&mut self) {
        self.algos.arm_sensor_delay();
    }

    pub fn main_frame_id(&self) -> u32 {
        self.main_frame_id
    }

    pub fn ancillary_frame_id(&self) -> u32 {
        self.ancillary_frame_id
    }

    pub fn dump_frame_id(&self) -> u32 {
        self.dump_frame_id
    }

    pub fn camera_instance(&self) -> u32 {
        self.camera_instance
    }

    pub fn iq_param(&self) -> &IqParam {
        &self.iq
    }

    pub fn sensor_info(&self) -> &SensorInfo {
        self.device.sensor_info()
    }

    pub fn algorithms(&self) -> &AlgoScheduler {
        &self.algos
    }

    pub fn statistics(&self) -> &StatsEngine {
        &self.stats
    }
}
