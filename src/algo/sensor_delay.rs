// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Sensor delay calibration.
//!
//! Measures how many frames pass between a sensor gain or exposure write
//! and the first frame showing it. The tuning tool arms the measurement;
//! AEC and AWB are suspended while it sweeps a fixed set of sensor
//! settings, then restored. The result parameterises the AEC statistics
//! delay.

use super::{estimator::ExposureSettings, AlgoEnv, AlgoId, AlgoState, StatWait};
use crate::{
    capability::SensorInfo,
    error::Result,
    stats::{StatClient, StatLocation, StatSnapshot, StatType},
};
use tracing::{debug, info};

/// Frames after which a point is declared invalid.
pub const DELAY_MAX: u32 = 10;

/// Number of sensor settings swept.
pub const CONFIG_COUNT: usize = 12;

/// Luminance change that marks a settings change as visible.
pub const LUMINANCE_MARGIN: u32 = 3;

/// The swept settings: exposure from minimum to 100% in 20% steps at
/// minimum gain, then gain from 10% to 60% at maximum exposure.
pub fn sweep(info: &SensorInfo) -> [ExposureSettings; CONFIG_COUNT] {
    let mut configs = [ExposureSettings::default(); CONFIG_COUNT];
    for i in 0..6u32 {
        configs[i as usize] = ExposureSettings {
            gain: info.gain_min,
            exposure: if i == 0 {
                info.exposure_min
            } else {
                (info.exposure_max as u64 * 20 * i as u64 / 100) as u32
            },
        };
        configs[i as usize + 6] = ExposureSettings {
            gain: (info.gain_max as u64 * 10 * (i as u64 + 1) / 100) as u32,
            exposure: info.exposure_max,
        };
    }
    configs
}

/// Counts frames until the luminance leaves the reference band.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DelayMeter {
    reference: u8,
    elapsed: u32,
}

impl DelayMeter {
    pub fn new(reference: u8) -> Self {
        Self {
            reference,
            elapsed: 0,
        }
    }

    /// Feed the luminance of the next frame. Returns the elapsed frame
    /// count once the luminance moved past the margin or the window ran
    /// out; a count of [`DELAY_MAX`] is a timeout.
    pub fn observe(&mut self, luminance: u8) -> Option<u32> {
        self.elapsed += 1;
        let moved = luminance.abs_diff(self.reference) as u32 > LUMINANCE_MARGIN;
        (moved || self.elapsed == DELAY_MAX).then_some(self.elapsed)
    }
}

/// Largest valid delay, 0 when every point timed out.
pub fn measured_delay(delays: &[u32]) -> u32 {
    delays
        .iter()
        .copied()
        .filter(|d| *d != DELAY_MAX)
        .max()
        .unwrap_or(0)
}

#[derive(Clone, Debug, Default)]
pub struct SensorDelayCalibration {
    wait: StatWait,
    armed: bool,
    report: Option<u32>,
    configs: [ExposureSettings; CONFIG_COUNT],
    config_id: usize,
    meter: DelayMeter,
    delays: [u32; CONFIG_COUNT - 1],
    previous: ExposureSettings,
    previous_aec: bool,
    previous_awb: bool,
}

impl SensorDelayCalibration {
    pub fn state(&self) -> AlgoState {
        self.wait.state
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub(super) fn arm(&mut self) {
        debug!("sensor delay measurement armed");
        self.armed = true;
    }

    pub(super) fn take_report(&mut self) -> Option<u32> {
        self.report.take()
    }

    pub(super) fn init(&mut self, env: &mut AlgoEnv) -> Result<()> {
        self.wait.reset(env.stats);
        Ok(())
    }

    pub(super) fn deinit(&mut self, env: &mut AlgoEnv) -> Result<()> {
        self.wait.reset(env.stats);
        self.armed = false;
        Ok(())
    }

    pub(super) fn on_stats(&mut self, snapshot: StatSnapshot) {
        self.wait.ticket = None;
        self.wait.stats = snapshot;
        self.wait.state = AlgoState::StatReady;
    }

    fn request(&mut self, env: &mut AlgoEnv, delay: u32) -> Result<()> {
        let ticket = env.stats.get_next(
            env.frame_id,
            StatClient::Algo(AlgoId::SensorDelay),
            StatLocation::Down,
            StatType::AVG,
            delay,
        )?;
        self.wait.ticket = Some(ticket);
        self.wait.state = AlgoState::WaitingStat;
        Ok(())
    }

    fn apply(env: &mut AlgoEnv, settings: ExposureSettings) -> Result<()> {
        env.device.set_sensor_gain(settings.gain)?;
        env.device.set_sensor_exposure(settings.exposure)
    }

    fn start(&mut self, env: &mut AlgoEnv) -> Result<()> {
        self.previous_aec = env.iq.aec_algo.enable;
        self.previous_awb = env.iq.awb_algo.enable;
        self.previous = ExposureSettings {
            gain: env.device.sensor_gain()?,
            exposure: env.device.sensor_exposure()?,
        };
        env.iq.aec_algo.enable = false;
        env.iq.awb_algo.enable = false;

        self.configs = sweep(env.device.sensor_info());
        self.config_id = 0;
        Self::apply(env, self.configs[0])?;

        self.delays = [0; CONFIG_COUNT - 1];
        self.meter = DelayMeter::new(0);
        // settle on the first point before measuring
        self.request(env, DELAY_MAX)
    }

    fn finish(&mut self, env: &mut AlgoEnv) -> Result<()> {
        let delay = measured_delay(&self.delays);
        env.iq.aec_algo.enable = self.previous_aec;
        env.iq.awb_algo.enable = self.previous_awb;
        Self::apply(env, self.previous)?;
        if delay != 0 {
            env.iq.sensor_delay.delay = delay;
        }
        info!("sensor delay {} frames (points {:?})", delay, self.delays);
        self.report = Some(delay);
        self.armed = false;
        self.wait.state = AlgoState::Init;
        Ok(())
    }

    pub(super) fn process(&mut self, env: &mut AlgoEnv) -> Result<()> {
        if !self.armed {
            return Ok(());
        }
        match self.wait.state {
            AlgoState::Init => self.start(env),
            AlgoState::NeedStat | AlgoState::WaitingStat => Ok(()),
            AlgoState::StatReady => {
                let luminance = self.wait.stats.down.average_l;
                if self.config_id > 0 {
                    match self.meter.observe(luminance) {
                        None => return self.request(env, 1),
                        Some(delay) => self.delays[self.config_id - 1] = delay,
                    }
                }

                self.config_id += 1;
                if self.config_id == CONFIG_COUNT {
                    return self.finish(env);
                }
                Self::apply(env, self.configs[self.config_id])?;
                self.meter = DelayMeter::new(luminance);
                self.request(env, 1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_crossing() {
        let mut meter = DelayMeter::new(40);
        assert_eq!(meter.observe(41), None);
        assert_eq!(meter.observe(43), None);
        assert_eq!(meter.observe(44), Some(3));
    }

    #[test]
    fn test_meter_timeout() {
        let mut meter = DelayMeter::new(255);
        for _ in 1..DELAY_MAX {
            assert_eq!(meter.observe(255), None);
        }
        assert_eq!(meter.observe(255), Some(DELAY_MAX));
    }

    #[test]
    fn test_timeouts_excluded() {
        assert_eq!(measured_delay(&[2, 3, DELAY_MAX, 1]), 3);
        assert_eq!(measured_delay(&[DELAY_MAX; 11]), 0);
    }

    #[test]
    fn test_sweep() {
        let info = SensorInfo {
            gain_min: 0,
            gain_max: 30_000,
            exposure_min: 50,
            exposure_max: 10_000,
            ..Default::default()
        };
        let configs = sweep(&info);
        assert_eq!(configs[0].exposure, 50);
        assert_eq!(configs[1].exposure, 2000);
        assert_eq!(configs[5].exposure, 10_000);
        assert_eq!(configs[6].gain, 3000);
        assert_eq!(configs[11].gain, 18_000);
        assert!(configs[6..].iter().all(|c| c.exposure == 10_000));
    }
}
