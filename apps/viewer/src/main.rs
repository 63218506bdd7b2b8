use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use winit::event_loop::{ControlFlow, EventLoop};

mod app;
mod config;

use app::{UserEvent, ViewerApp};
use config::{Args, ViewerConfig};

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let config = ViewerConfig::resolve(&args)?;
    info!(
        width = config.pattern.width,
        height = config.pattern.height,
        fps = config.pattern.fps,
        row_order = ?config.pattern.row_order,
        background_decode = config.background_decode,
        "starting viewer"
    );

    let event_loop = EventLoop::<UserEvent>::with_user_event()
        .build()
        .context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = ViewerApp::new(config, event_loop.create_proxy());
    event_loop.run_app(&mut app).context("event loop failed")?;
    app.into_result()
}
