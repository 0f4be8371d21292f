// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst ISP Control Library
//!
//! Control middleware for a hardware image signal processor. It configures
//! the pixel pipeline image-quality blocks from an IQ parameter set, runs
//! the auto exposure, auto white balance, bad pixel and sensor delay loops
//! on top of a time-multiplexed statistics engine, and serves a remote
//! tuning tool over a binary command protocol.
//!
//! ## Features
//!
//! - **Capability Traits**: the sensor, the pixel pipeline, the statistics
//!   block and the application helpers are plugged in through
//!   [`capability`], so the core runs unchanged on hardware or on the
//!   [`sim`] camera.
//! - **Statistics Engine**: a ten stage cycle over three extraction channels
//!   with on-demand stage skipping and frame-accurate client callbacks.
//! - **Control Loops**: AEC and AWB state machines with pluggable numeric
//!   estimators.
//! - **Tuning Protocol**: little-endian command codec, dispatcher and a
//!   channel transport.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_isp::{context::IspBuilder, iq_param::StatArea, sim::SimCamera};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let camera = SimCamera::default();
//! let mut isp = IspBuilder::new()
//!     .with_sensor(Box::new(camera.sensor()))
//!     .with_pipeline(Box::new(camera.pipeline()))
//!     .with_statistics(Box::new(camera.statistics()))
//!     .with_stat_area(StatArea { x0: 0, y0: 0, x_size: 1920, y_size: 1080 })
//!     .build()?;
//! isp.start()?;
//!
//! for _ in 0..100 {
//!     camera.advance_frame();
//!     isp.on_main_vsync()?;
//!     isp.background_process()?;
//! }
//! println!("average luminance {}", isp.meta().average_l);
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading
//!
//! [`context::IspContext`] is a single-owner value. Frame events and the
//! background step mutate it through `&mut self`; hosts whose interrupts run
//! on another thread forward them through a channel to the owning task.

pub mod algo;
pub mod capability;
pub mod context;
pub mod device;
pub mod error;
pub mod iq_param;
pub mod protocol;
pub mod sim;
pub mod stats;
