// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Bad pixel strength control.

use super::{AlgoEnv, AlgoState};
use crate::{error::Result, iq_param::BAD_PIXEL_STRENGTH_MAX};
use tracing::debug;

/// Frames averaged per decision.
pub const MEASURE_FRAMES: i32 = 10;

/// Averages the hardware bad pixel counter over [`MEASURE_FRAMES`] new
/// frames and nudges the strength one step toward the configured threshold.
#[derive(Clone, Debug, Default)]
pub struct BadPixelControl {
    state: AlgoState,
    last_frame: Option<u32>,
    /// Negative while waiting for the hardware to settle.
    step: i32,
    count: u32,
}

impl BadPixelControl {
    pub fn state(&self) -> AlgoState {
        self.state
    }

    pub(super) fn init(&mut self, _env: &mut AlgoEnv) -> Result<()> {
        *self = Self::default();
        Ok(())
    }

    pub(super) fn deinit(&mut self, _env: &mut AlgoEnv) -> Result<()> {
        Ok(())
    }

    pub(super) fn process(&mut self, env: &mut AlgoEnv) -> Result<()> {
        if !env.iq.bad_pixel_algo.enable {
            return Ok(());
        }
        if self.last_frame == Some(env.frame_id) {
            return Ok(());
        }
        self.last_frame = Some(env.frame_id);

        let measure = self.step >= 0;
        self.step += 1;
        if !measure {
            return Ok(());
        }

        let mut config = env.device.bad_pixel(env.stats.bad_pixel_count()?)?;
        self.count += config.count;

        if self.step == MEASURE_FRAMES {
            let average = self.count / MEASURE_FRAMES as u32;
            let threshold = env.iq.bad_pixel_algo.threshold;
            if average > threshold && config.strength > 0 {
                config.strength -= 1;
            } else if average < threshold && config.strength < BAD_PIXEL_STRENGTH_MAX - 1 {
                // the top strength gives poor results
                config.strength += 1;
            }
            config.enable = true;
            debug!(
                "bad pixels {} (threshold {}) strength {}",
                average, threshold, config.strength
            );
            env.device.set_bad_pixel(&config)?;
            // one frame for the hardware to apply the new strength
            self.step = -1;
            self.count = 0;
        }
        Ok(())
    }
}
