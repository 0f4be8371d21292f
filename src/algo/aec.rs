// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Auto exposure control.

use super::{
    estimator::{
        ExposureEstimator, ExposureRequest, ExposureSettings, RateLimitedExposure, SensorLimits,
    },
    AlgoEnv, AlgoId, AlgoState, StatWait,
};
use crate::{
    error::Result,
    iq_param::IDEAL_EXPOSURE_TARGET,
    stats::{StatClient, StatLocation, StatSnapshot, StatType},
};
use tracing::{debug, trace};

/// Target luminance for an exposure compensation in half-EV steps.
pub fn exposure_target(compensation: i32) -> u32 {
    (IDEAL_EXPOSURE_TARGET as f64 * 2f64.powf(compensation as f64 / 2.0)) as u32
}

/// Drives the sensor gain and exposure toward the target average
/// luminance of the down statistics.
pub struct Aec {
    estimator: Box<dyn ExposureEstimator>,
    wait: StatWait,
    enabled: bool,
}

impl Default for Aec {
    fn default() -> Self {
        Self::new(Box::new(RateLimitedExposure::default()))
    }
}

impl Aec {
    pub fn new(estimator: Box<dyn ExposureEstimator>) -> Self {
        Self {
            estimator,
            wait: StatWait::default(),
            enabled: false,
        }
    }

    pub fn state(&self) -> AlgoState {
        self.wait.state
    }

    pub(super) fn init(&mut self, env: &mut AlgoEnv) -> Result<()> {
        if env.iq.sensor_delay.delay == 0 {
            env.iq.sensor_delay.delay = 1;
        }
        let info = env.device.sensor_info();
        self.estimator.configure(SensorLimits {
            gain_min: info.gain_min,
            gain_max: info.gain_max,
            exposure_min: info.exposure_min,
            exposure_max: info.exposure_max,
        })?;

        if env.iq.aec_algo.enable {
            let (exposure, gain) = (info.exposure_min, info.gain_min);
            env.device.set_sensor_exposure(exposure)?;
            env.device.set_sensor_gain(gain)?;
        }
        self.wait.reset(env.stats);
        self.enabled = env.iq.aec_algo.enable;
        Ok(())
    }

    pub(super) fn deinit(&mut self, env: &mut AlgoEnv) -> Result<()> {
        self.wait.reset(env.stats);
        Ok(())
    }

    pub(super) fn on_stats(&mut self, snapshot: StatSnapshot) {
        self.wait.ticket = None;
        self.wait.stats = snapshot;
        self.wait.state = AlgoState::StatReady;
    }

    fn request(&mut self, env: &mut AlgoEnv) -> Result<()> {
        let ticket = env.stats.get_next(
            env.frame_id,
            StatClient::Algo(AlgoId::Aec),
            StatLocation::Down,
            StatType::AVG,
            env.iq.sensor_delay.delay.max(1),
        )?;
        self.wait.ticket = Some(ticket);
        self.wait.state = AlgoState::WaitingStat;
        Ok(())
    }

    pub(super) fn process(&mut self, env: &mut AlgoEnv) -> Result<()> {
        if !env.iq.aec_algo.enable {
            self.enabled = false;
            return Ok(());
        }
        if !self.enabled {
            debug!("AEC resumed");
            self.wait.reset(env.stats);
            self.enabled = true;
        }

        match self.wait.state {
            AlgoState::Init | AlgoState::NeedStat => self.request(env),
            AlgoState::WaitingStat => Ok(()),
            AlgoState::StatReady => {
                let aec = env.iq.aec_algo;
                let luminance = self.wait.stats.down.average_l;
                let current = ExposureSettings {
                    gain: env.device.sensor_gain()?,
                    exposure: env.device.sensor_exposure()?,
                };
                env.meta.average_l = luminance;
                env.meta.exposure_target = aec.exposure_target;

                let estimate = self.estimator.estimate(&ExposureRequest {
                    target: aec.exposure_target,
                    tolerance: aec.tolerance,
                    anti_flicker_hz: aec.anti_flicker_hz,
                    current,
                    luminance,
                });
                match estimate {
                    Ok(next) => {
                        if next.gain != current.gain {
                            trace!("AEC gain {}", next.gain);
                            env.device.set_sensor_gain(next.gain)?;
                        }
                        if next.exposure != current.exposure {
                            trace!("AEC exposure {}", next.exposure);
                            env.device.set_sensor_exposure(next.exposure)?;
                        }
                    }
                    Err(err) => debug!("exposure estimation failed: {}", err),
                }
                self.request(env)
            }
        }
    }
}
