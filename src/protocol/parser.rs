// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Command dispatch.
//!
//! A SET writes the hardware first and only updates the IQ parameter cache
//! once the write succeeded. For blocks carrying an enable flag a disabled
//! payload only clears the cached flag, leaving the cached tuning intact.

use super::{
    codec::{AwbProfileInfo, ExposureTarget, Version, WbRefMode},
    dump_chunks, get_reply, status_reply, CommandId, Header, Operation, SetCommand, HEADER_LEN,
    TOOL_STAT_DELAY,
};
use crate::{
    capability::DumpConfig,
    context::IspContext,
    error::{IspError, Result, Status},
    stats::{StatClient, StatLocation, StatType},
};
use tracing::{debug, warn};

/// Copy a block into the cache, or only its disabled flag.
macro_rules! store {
    ($cache:expr, $value:expr) => {{
        let value = $value;
        if value.enable {
            $cache = value;
        } else {
            $cache.enable = false;
        }
    }};
}

/// Process one received command, appending the packets to send back to
/// `out` in order.
///
/// Every SET and GET produces a reply, except a successful statistics GET
/// whose reply is sent once the requested statistics are available.
///
/// # Errors
///
/// Returns the error that was reported to the tool. A packet that is not a
/// request gets no reply.
pub fn process_command(ctx: &mut IspContext, cmd: &[u8], out: &mut Vec<Vec<u8>>) -> Result<()> {
    let header = Header::parse(cmd).inspect_err(|err| warn!("dropped command: {}", err))?;
    let payload = &cmd[HEADER_LEN..];

    match header.operation {
        Operation::Set => {
            debug!("SET {:#04x} ({} bytes)", header.id, payload.len());
            let result = CommandId::try_from(header.id).and_then(|id| set(ctx, id, payload));
            let (operation, status) = match &result {
                Ok(()) => (Operation::SetOk, Status::Ok),
                Err(err) => {
                    warn!("SET {:#04x} failed: {}", header.id, err.status());
                    (Operation::SetFail, err.status())
                }
            };
            out.push(status_reply(operation, header.id, status));
            result
        }
        Operation::Get => {
            debug!("GET {:#04x}", header.id);
            let result = CommandId::try_from(header.id).and_then(|id| get(ctx, id, out));
            if let Err(err) = &result {
                warn!("GET {:#04x} failed: {}", header.id, err.status());
                out.push(status_reply(Operation::GetFail, header.id, err.status()));
            }
            result
        }
        reply => {
            warn!("dropped {:?} packet for {:#04x}", reply, header.id);
            Err(IspError::UnknownOperation(reply as u8))
        }
    }
}

fn set(ctx: &mut IspContext, id: CommandId, payload: &[u8]) -> Result<()> {
    match SetCommand::decode(id, payload)? {
        SetCommand::StatRemoval(v) => {
            ctx.device.set_stat_removal(&v)?;
            store!(ctx.iq.stat_removal, v);
        }
        SetCommand::Demosaicing(v) => {
            ctx.device.set_demosaicing(&v)?;
            store!(ctx.iq.demosaicing, v);
        }
        SetCommand::Contrast(v) => {
            ctx.device.set_contrast(&v)?;
            store!(ctx.iq.contrast, v);
        }
        SetCommand::StatisticArea(area) | SetCommand::UserStatisticArea(area) => {
            ctx.set_stat_area(&area)?;
            ctx.iq.stat_area_static = area;
        }
        SetCommand::SensorGain(gain) => {
            ctx.device.set_sensor_gain(gain)?;
            ctx.iq.sensor_gain_static = gain;
        }
        SetCommand::SensorExposure(exposure) => {
            ctx.device.set_sensor_exposure(exposure)?;
            ctx.iq.sensor_exposure_static = exposure;
        }
        SetCommand::BadPixelAlgo(v) => store!(ctx.iq.bad_pixel_algo, v),
        SetCommand::BadPixelStatic(v) => {
            ctx.device.set_bad_pixel(&v)?;
            store!(ctx.iq.bad_pixel_static, v);
        }
        SetCommand::BlackLevelStatic(v) => {
            ctx.device.set_black_level(&v)?;
            store!(ctx.iq.black_level_static, v);
        }
        SetCommand::AecAlgo(v) => {
            let compensation = v.exposure_compensation;
            store!(ctx.iq.aec_algo, v);
            ctx.set_exposure_target(compensation)?;
        }
        SetCommand::AwbAlgo(v) => {
            let enable = v.enable;
            ctx.iq.awb_algo = v;
            if enable {
                ctx.algos.request_awb_reconfigure();
            }
        }
        SetCommand::IspGainStatic(v) => {
            ctx.device.set_isp_gain(&v)?;
            store!(ctx.iq.isp_gain_static, v);
        }
        SetCommand::ColorConvStatic(v) => {
            ctx.device.set_color_conv(&v)?;
            store!(ctx.iq.color_conv_static, v);
        }
        SetCommand::StopPreview => ctx.device.stop_preview()?,
        SetCommand::StartPreview => ctx.device.start_preview()?,
        SetCommand::Gamma(v) => {
            ctx.device.set_gamma(&v)?;
            ctx.iq.gamma = v;
        }
        SetCommand::SensorTestPattern(mode) => ctx.device.set_test_pattern(mode)?,
        SetCommand::SensorDelay => ctx.arm_sensor_delay_calibration(),
        SetCommand::UserExposureTarget(v) => ctx.set_exposure_target(v.compensation)?,
        SetCommand::UserWbRefMode(v) => ctx.set_wb_ref_mode(v.automatic, v.color_temp)?,
    }
    Ok(())
}

fn dump(ctx: &mut IspContext, id: CommandId, config: DumpConfig, out: &mut Vec<Vec<u8>>) -> Result<()> {
    let dump = ctx.device.dump_frame(config)?;
    out.push(get_reply(id, &dump.meta));
    let size = (dump.meta.size as usize).min(dump.data.len());
    out.extend(dump_chunks(&dump.data[..size]).iter().map(|c| c.to_packet()));
    Ok(())
}

fn statistics(ctx: &mut IspContext, location: StatLocation) -> Result<()> {
    let frame_id = ctx.main_frame_id();
    ctx.stats.get_next(
        frame_id,
        StatClient::Tool,
        location,
        StatType::ALL,
        TOOL_STAT_DELAY,
    )?;
    Ok(())
}

fn get(ctx: &mut IspContext, id: CommandId, out: &mut Vec<Vec<u8>>) -> Result<()> {
    let reply = match id {
        CommandId::StatRemoval => get_reply(id, &ctx.iq.stat_removal),
        CommandId::Decimation | CommandId::UserGetDecimation => {
            get_reply(id, &ctx.decimation_factor())
        }
        CommandId::Demosaicing => get_reply(id, &ctx.iq.demosaicing),
        CommandId::Contrast => get_reply(id, &ctx.iq.contrast),
        CommandId::StatisticArea | CommandId::UserStatisticArea => {
            get_reply(id, &ctx.stat_area()?)
        }
        CommandId::SensorGain => get_reply(id, &ctx.device.sensor_gain()?),
        CommandId::SensorExposure => get_reply(id, &ctx.device.sensor_exposure()?),
        CommandId::BadPixelAlgo => get_reply(id, &ctx.iq.bad_pixel_algo),
        CommandId::BadPixelStatic => {
            let count = ctx.stats.bad_pixel_count()?;
            get_reply(id, &ctx.device.bad_pixel(count)?)
        }
        CommandId::BlackLevelStatic => get_reply(id, &ctx.device.black_level()?),
        CommandId::AecAlgo => get_reply(id, &ctx.iq.aec_algo),
        CommandId::AwbAlgo => get_reply(id, &ctx.iq.awb_algo),
        CommandId::AwbProfile => {
            let index = ctx.algos.awb().and_then(|a| a.profile_index()).unwrap_or(0);
            let info = ctx
                .iq
                .awb_algo
                .profiles
                .get(index)
                .map(|p| AwbProfileInfo {
                    id: p.id.clone(),
                    color_temp: p.color_temp,
                })
                .unwrap_or_default();
            get_reply(id, &info)
        }
        CommandId::IspGainStatic => get_reply(id, &ctx.device.isp_gain()?),
        CommandId::ColorConvStatic => get_reply(id, &ctx.device.color_conv()?),
        CommandId::StatisticUp => return statistics(ctx, StatLocation::Up),
        CommandId::StatisticDown => return statistics(ctx, StatLocation::Down),
        CommandId::DumpPreviewFrame => return dump(ctx, id, DumpConfig::Default, out),
        CommandId::DumpIspFrame => return dump(ctx, id, DumpConfig::FullsizeRgb888, out),
        CommandId::DumpRawFrame => return dump(ctx, id, DumpConfig::DumpPipeSensor, out),
        CommandId::DcmippVersion => {
            let (major, minor) = ctx.device.version()?;
            get_reply(id, &Version { major, minor })
        }
        CommandId::Gamma => get_reply(id, &ctx.iq.gamma),
        CommandId::SensorInfo => get_reply(id, ctx.device.sensor_info()),
        CommandId::SensorDelay => get_reply(id, &ctx.iq.sensor_delay.delay),
        CommandId::UserExposureTarget => {
            let (compensation, target) = ctx.exposure_target();
            get_reply(
                id,
                &ExposureTarget {
                    compensation,
                    target,
                },
            )
        }
        CommandId::UserListWbRefModes => get_reply(id, &ctx.list_wb_ref_modes()),
        CommandId::UserWbRefMode => {
            let (automatic, color_temp) = ctx.wb_ref_mode();
            get_reply(
                id,
                &WbRefMode {
                    automatic,
                    color_temp,
                },
            )
        }
        CommandId::StopPreview | CommandId::StartPreview | CommandId::SensorTestPattern => {
            return Err(IspError::UnknownCommand(id as u8))
        }
    };
    out.push(reply);
    Ok(())
}
