// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Auto white balance.
//!
//! The estimator picks one of the calibrated profiles; the state machine
//! applies the profile's colour conversion and ISP gains when the chosen
//! temperature changes. Estimation is skipped while the scene is stable,
//! except for a few ticks after a (re)start or a temperature change.

use super::{
    estimator::{ProfileWhiteBalance, WbHyperParams, WbMeasurement, WbProfile, WhiteBalanceEstimator},
    AlgoEnv, AlgoId, AlgoState, StatWait, ISP_LATENCY,
};
use crate::{
    device::{Device, MAIN_PIPE},
    error::{IspError, Result},
    iq_param::{AwbProfile, ColorConv, IspGain, AWB_MAX_PROFILES, PRECISION},
    stats::{StatClient, StatLocation, StatSnapshot, StatType},
};
use tracing::{debug, info, warn};

/// Extra frames for the pipeline to settle after a profile change.
pub const ADDITIONAL_LATENCY: u32 = 3;

/// Forced estimations after a (re)start.
pub const SKIP_AFTER_INIT: u8 = 10;

/// Forced estimations after a temperature change.
pub const SKIP_AFTER_ESTIMATION: u8 = 4;

/// Per-channel difference that counts as a scene change.
pub const STAT_CHANGE_THRESHOLD: u32 = 2;

/// Decision threshold between two adjacent profile temperatures: a quarter
/// of the way up from the lower one.
pub fn threshold(lower: u32, upper: u32) -> f32 {
    ((upper + 3 * lower) / 4) as f32
}

/// Apply the colour conversion currently programmed in hardware, clamped
/// to 0..=255.
pub fn apply_color_conv(conv: &ColorConv, rgb: [u8; 3]) -> [u32; 3] {
    if !conv.enable {
        return rgb.map(u32::from);
    }
    let input = rgb.map(i64::from);
    conv.coeff.map(|row| {
        let acc: i64 = row.iter().zip(input).map(|(c, v)| *c as i64 * v).sum();
        (acc / PRECISION).clamp(0, 255) as u32
    })
}

/// Undo a 2.2 display gamma.
pub fn gamma_inverse(component: u32, gamma: bool) -> f64 {
    if gamma {
        255.0 * (component as f64 / 255.0).powf(1.0 / 2.2)
    } else {
        component as f64
    }
}

/// Approximate the sensor RGB from the down averages by reversing the ISP
/// gain and the black level.
pub fn reverse_isp(device: &Device, down: [u8; 3]) -> [u32; 3] {
    let gain = device.isp_gain().unwrap_or_default();
    if !gain.enable {
        return down.map(u32::from);
    }
    let mut up = [0u32; 3];
    for ((out, value), g) in up.iter_mut().zip(down).zip([gain.r, gain.g, gain.b]) {
        *out = if g == 0 {
            value as u32
        } else {
            (value as i64 * PRECISION / g as i64) as u32
        };
    }
    if let Ok(black) = device.black_level() {
        if black.enable {
            up[0] += black.r as u32;
            up[1] += black.g as u32;
            up[2] += black.b as u32;
        }
    }
    up
}

/// Auto white balance state machine.
pub struct Awb {
    estimator: Box<dyn WhiteBalanceEstimator>,
    wait: StatWait,
    enabled: bool,
    reconfigure: bool,
    current_temp: u32,
    current_profile: Option<usize>,
    stats_history: [[u32; 3]; 3],
    temp_history: [u32; 2],
    skip_count: u8,
    oscillating: bool,
}

impl Default for Awb {
    fn default() -> Self {
        Self::new(Box::new(ProfileWhiteBalance::new()))
    }
}

impl Awb {
    pub fn new(estimator: Box<dyn WhiteBalanceEstimator>) -> Self {
        Self {
            estimator,
            wait: StatWait::default(),
            enabled: false,
            reconfigure: false,
            current_temp: 0,
            current_profile: None,
            stats_history: [[0; 3]; 3],
            temp_history: [0; 2],
            skip_count: SKIP_AFTER_INIT,
            oscillating: false,
        }
    }

    pub fn state(&self) -> AlgoState {
        self.wait.state
    }

    /// Colour temperature of the applied profile, 0 before the first one.
    pub fn color_temp(&self) -> u32 {
        self.current_temp
    }

    /// Index of the applied profile.
    pub fn profile_index(&self) -> Option<usize> {
        self.current_profile
    }

    pub fn is_oscillating(&self) -> bool {
        self.oscillating
    }

    pub(super) fn request_reconfigure(&mut self) {
        self.reconfigure = true;
        // picked up as a restart on the next process
        self.enabled = false;
    }

    pub(super) fn init(&mut self, env: &mut AlgoEnv) -> Result<()> {
        self.wait.reset(env.stats);
        self.enabled = false;
        Ok(())
    }

    pub(super) fn deinit(&mut self, env: &mut AlgoEnv) -> Result<()> {
        self.wait.reset(env.stats);
        Ok(())
    }

    pub(super) fn on_stats(&mut self, snapshot: StatSnapshot) {
        self.wait.ticket = None;
        if self.wait.state != AlgoState::Init {
            self.wait.stats = snapshot;
            self.wait.state = AlgoState::StatReady;
        }
    }

    fn request(&mut self, env: &mut AlgoEnv) -> Result<()> {
        let ticket = env.stats.get_next(
            env.frame_id,
            StatClient::Algo(AlgoId::Awb),
            StatLocation::Down,
            StatType::AVG,
            ISP_LATENCY + ADDITIONAL_LATENCY,
        )?;
        self.wait.ticket = Some(ticket);
        self.wait.state = AlgoState::WaitingStat;
        Ok(())
    }

    /// Register the profiles of the IQ parameters with the estimator.
    fn load_profiles(&mut self, profiles: &[AwbProfile]) -> Result<()> {
        let profiles = &profiles[..profiles.len().min(AWB_MAX_PROFILES)];
        if profiles.is_empty() {
            return Err(IspError::UnknownColorTemperature(0));
        }
        let wb: Vec<WbProfile> = profiles
            .iter()
            .map(|p| {
                let mut profile =
                    WbProfile::from_tuning(p.color_temp, [p.gain_r, p.gain_g, p.gain_b], &p.coeff);
                profile.ccm_offsets = p.offset.map(|o| o as f32);
                profile
            })
            .collect();
        let thresholds: Vec<f32> = profiles
            .windows(2)
            .map(|w| threshold(w[0].color_temp, w[1].color_temp))
            .collect();
        debug!("AWB thresholds {:?}", thresholds);
        self.estimator
            .init_profiles(&wb, &thresholds, WbHyperParams::for_profiles(wb.len()))
    }

    /// Apply colour conversion then ISP gain of `profile`. The temperature
    /// is only recorded once both writes succeeded.
    fn apply(&mut self, env: &mut AlgoEnv, index: usize, profile: &AwbProfile) -> Result<()> {
        env.device.set_color_conv(&ColorConv {
            enable: true,
            coeff: profile.coeff,
            offset: profile.offset,
        })?;
        env.device.set_isp_gain(&IspGain {
            enable: true,
            r: profile.gain_r,
            g: profile.gain_g,
            b: profile.gain_b,
        })?;
        info!("white balance {} ({}K)", profile.id, profile.color_temp);
        self.current_temp = profile.color_temp;
        self.current_profile = Some(index);
        env.meta.color_temp = profile.color_temp;
        Ok(())
    }

    fn estimate(&mut self, env: &mut AlgoEnv, up: [u32; 3]) -> Result<()> {
        let down = self.wait.stats.down;
        let rgb = [down.average_r, down.average_g, down.average_b];
        let conv = env.device.color_conv().unwrap_or_default();
        let gamma = env.device.gamma_enabled(MAIN_PIPE);
        let processed = apply_color_conv(&conv, rgb).map(|c| gamma_inverse(c, gamma));
        let measurement = WbMeasurement {
            raw: up.map(f64::from),
            processed,
        };
        let temp = self.estimator.run(&measurement)?;

        if temp == self.current_temp && !self.reconfigure {
            self.oscillating = false;
            return Ok(());
        }
        if temp == self.temp_history[1] && !self.reconfigure {
            if !self.oscillating {
                warn!("AWB oscillating around {}K", temp);
            }
            self.oscillating = true;
            self.skip_count = 0;
            return Ok(());
        }
        self.oscillating = false;
        self.skip_count = self.skip_count.max(SKIP_AFTER_ESTIMATION);

        let Some((index, profile)) = env.iq.awb_algo.profile(temp) else {
            return Err(IspError::UnknownColorTemperature(temp));
        };
        let profile = profile.clone();
        self.apply(env, index, &profile)
    }

    pub(super) fn process(&mut self, env: &mut AlgoEnv) -> Result<()> {
        if !env.iq.awb_algo.enable {
            self.enabled = false;
            return Ok(());
        }
        if !self.enabled {
            debug!("AWB (re)started");
            self.wait.reset(env.stats);
            self.reconfigure = true;
            self.enabled = true;
            self.skip_count = SKIP_AFTER_INIT;
            self.oscillating = false;
        }

        match self.wait.state {
            AlgoState::Init => {
                self.load_profiles(&env.iq.awb_algo.profiles)?;
                self.request(env)
            }
            AlgoState::NeedStat => self.request(env),
            AlgoState::WaitingStat => Ok(()),
            AlgoState::StatReady => {
                let down = self.wait.stats.down;
                let up = reverse_isp(env.device, [down.average_r, down.average_g, down.average_b]);
                let changed = self.stats_history.iter().any(|past| {
                    past.iter()
                        .zip(up)
                        .any(|(p, u)| p.abs_diff(u) > STAT_CHANGE_THRESHOLD)
                });

                let mut result = Ok(());
                if self.skip_count > 0 || changed || self.reconfigure || self.oscillating {
                    self.stats_history[2] = up;
                    result = self.estimate(env, up);
                }

                self.reconfigure = false;
                self.skip_count = self.skip_count.saturating_sub(1);
                self.stats_history[1] = self.stats_history[0];
                self.stats_history[0] = up;
                self.temp_history[1] = self.temp_history[0];
                self.temp_history[0] = self.current_temp;

                let requested = self.request(env);
                result.and(requested)
            }
        }
    }
}
