// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use edgefirst_isp::{
    capability::SensorInfo,
    context::{IspBuilder, IspContext},
    iq_param::{IqParam, StatArea},
    protocol::{
        self,
        codec::{from_bytes, Version},
        get_request, CommandId, Header, Operation, ToolLink, HEADER_LEN,
    },
    sim::{Scene, SimCamera},
    stats::StatSample,
};
use std::{error::Error, time::Duration};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, Layer};

/// Period of the simulated tuning tool statistics polls.
const TOOL_POLL: Duration = Duration::from_secs(1);

fn init_logging(args: &Args) -> Result<(), Box<dyn Error>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let stdout_log = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(level);

    let journald = if args.journald {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer.with_filter(level)),
            Err(err) => {
                eprintln!("journald unavailable: {}", err);
                None
            }
        }
    } else {
        None
    };

    let tracy = if args.tracy {
        tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default().with_filter(LevelFilter::TRACE))
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn build_isp(args: &Args, camera: &SimCamera, iq: IqParam) -> Result<(IspContext, ToolLink), Box<dyn Error>> {
    let (transport, tool) = protocol::channel(4);
    let mut builder = IspBuilder::new()
        .with_sensor(Box::new(camera.sensor()))
        .with_pipeline(Box::new(camera.pipeline()))
        .with_statistics(Box::new(camera.statistics()))
        .with_app_helpers(Box::new(camera.helpers()))
        .with_transport(Box::new(transport));

    let info = SimCamera::default_sensor();
    let area = match args.stat_area.as_deref() {
        Some(&[x0, y0, x_size, y_size]) => Some(StatArea {
            x0,
            y0,
            x_size,
            y_size,
        }),
        Some(other) => return Err(format!("invalid stat area {:?}", other).into()),
        None if iq.stat_area_static.is_empty() => Some(StatArea {
            x0: 0,
            y0: 0,
            x_size: info.width,
            y_size: info.height,
        }),
        None => None,
    };
    if let Some(area) = area {
        builder = builder.with_stat_area(area);
    }

    let isp = builder.with_iq_param(iq).build()?;
    Ok((isp, tool))
}

/// Log one reply received by the simulated tuning tool.
fn log_reply(packet: &[u8]) {
    let header = match Header::parse(packet) {
        Ok(header) => header,
        Err(err) => {
            warn!("tool: malformed reply: {}", err);
            return;
        }
    };
    let payload = packet.get(HEADER_LEN..).unwrap_or_default();
    match (header.operation, CommandId::try_from(header.id)) {
        (Operation::GetOk, Ok(CommandId::StatisticDown)) => {
            match from_bytes::<StatSample>(header.id, payload) {
                Ok(sample) => info!(
                    "tool: down R {} G {} B {} L {}",
                    sample.average_r, sample.average_g, sample.average_b, sample.average_l
                ),
                Err(err) => warn!("tool: statistics: {}", err),
            }
        }
        (Operation::GetOk, Ok(CommandId::SensorInfo)) => {
            if let Ok(info) = from_bytes::<SensorInfo>(header.id, payload) {
                info!("tool: sensor {} {}x{}", info.name, info.width, info.height);
            }
        }
        (Operation::GetOk, Ok(CommandId::DcmippVersion)) => {
            if let Ok(version) = from_bytes::<Version>(header.id, payload) {
                info!("tool: pipeline v{}.{}", version.major, version.minor);
            }
        }
        (Operation::GetOk, Ok(CommandId::SensorDelay)) => {
            if let Ok(delay) = from_bytes::<u32>(header.id, payload) {
                info!("tool: sensor delay {} frames", delay);
            }
        }
        (operation, _) => debug!(
            "tool: {:?} {:#04x} status {:?}",
            operation, header.id, header.status
        ),
    }
}

/// A scripted tuning tool: identify the hardware then poll the down
/// statistics.
async fn tool(link: ToolLink) {
    for id in [CommandId::SensorInfo, CommandId::DcmippVersion] {
        if let Err(err) = link.send(get_request(id)) {
            warn!("tool: {}", err);
            return;
        }
    }

    let mut poll = interval(TOOL_POLL);
    loop {
        poll.tick().await;
        match link.drain() {
            Ok(replies) => replies.iter().for_each(|r| log_reply(r)),
            Err(_) => return,
        }
        if link.send(get_request(CommandId::StatisticDown)).is_err() {
            return;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args)?;

    let iq = match &args.iq_param {
        Some(path) => IqParam::load(path)?,
        None => IqParam::default(),
    };
    let camera = SimCamera::new(
        SimCamera::default_sensor(),
        Scene {
            luminance: args.scene_luminance,
            ..Scene::default()
        },
        args.sensor_latency,
    );

    let (mut isp, link) = build_isp(&args, &camera, iq)?;
    isp.start()?;
    if args.calibrate_delay {
        isp.arm_sensor_delay_calibration();
    }
    let tool_task = tokio::spawn(tool(link).instrument(info_span!("tool")));

    let mut frames = interval(Duration::from_secs(1) / args.fps.max(1));
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frame = 0u64;
    while args.frames == 0 || frame < args.frames {
        frames.tick().await;
        camera.advance_frame();
        if let Err(err) = isp.on_main_vsync() {
            error!("frame {}: {}", frame, err);
        }
        if let Err(err) = isp.background_process() {
            warn!("frame {}: {}", frame, err);
        }
        frame += 1;
    }

    let meta = isp.meta();
    info!(
        "ran {} frames: L {} target {} colour temperature {}K",
        frame, meta.average_l, meta.exposure_target, meta.color_temp
    );
    isp.deinit()?;
    drop(isp);
    tool_task.abort();
    Ok(())
}
