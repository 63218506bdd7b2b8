use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use frame_source::{PatternConfig, PixelFormat, RowOrder};
use playback::ClockConfig;
use renderer::PresenterConfig;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug, Default)]
#[command(name = "viewer")]
#[command(about = "Plays a synthetic video stream at the display's refresh rate")]
#[command(version)]
pub struct Args {
    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Window width in logical pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Window height in logical pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Override the detected display refresh rate (Hz)
    #[arg(long)]
    pub refresh_hz: Option<f64>,

    /// Frame rate of the test pattern
    #[arg(long)]
    pub fps: Option<f64>,

    /// Test pattern size, e.g. 1920x1080
    #[arg(long, value_parser = parse_size)]
    pub frame_size: Option<(u32, u32)>,

    /// Produce bottom-up frames
    #[arg(long)]
    pub bottom_up: bool,

    /// Produce RGBA instead of BGRA frames
    #[arg(long)]
    pub rgba: bool,

    /// Decode on a worker thread instead of rendering on the clock tick
    #[arg(long)]
    pub background_decode: bool,

    /// Redraw on every notification even if nothing changed
    #[arg(long)]
    pub no_skip_unchanged: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let w = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let h = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
    if w == 0 || h == 0 {
        return Err("frame size must be non-zero".to_string());
    }
    Ok((w, h))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "viewer".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub window: WindowConfig,
    pub clock: ClockConfig,
    pub presenter: PresenterConfig,
    pub pattern: PatternConfig,
    pub background_decode: bool,
}

impl ViewerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Config file (if any) with command-line overrides applied.
    pub fn resolve(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(args);
        Ok(config)
    }

    pub fn apply(&mut self, args: &Args) {
        if let Some(width) = args.width {
            self.window.width = width;
        }
        if let Some(height) = args.height {
            self.window.height = height;
        }
        if let Some(hz) = args.refresh_hz {
            self.clock.refresh_hz = Some(hz);
        }
        if let Some(fps) = args.fps {
            self.pattern.fps = fps;
        }
        if let Some((width, height)) = args.frame_size {
            self.pattern.width = width;
            self.pattern.height = height;
        }
        if args.bottom_up {
            self.pattern.row_order = RowOrder::BottomUp;
        }
        if args.rgba {
            self.pattern.format = PixelFormat::Rgba8;
        }
        if args.background_decode {
            self.background_decode = true;
        }
        if args.no_skip_unchanged {
            self.presenter.skip_unchanged = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ViewerConfig = serde_json::from_str(
            r#"{ "pattern": { "fps": 24.0, "row_order": "bottom_up" }, "clock": { "refresh_hz": 120.0 } }"#,
        )
        .unwrap();
        assert_eq!(config.pattern.fps, 24.0);
        assert_eq!(config.pattern.row_order, RowOrder::BottomUp);
        assert_eq!(config.pattern.width, 1280);
        assert_eq!(config.clock.refresh_hz, Some(120.0));
        assert_eq!(config.clock.thread_name, "display-clock");
        assert!(config.presenter.skip_unchanged);
        assert_eq!(config.window.width, 1280);
    }

    #[test]
    fn flags_override_file_values() {
        let mut config = ViewerConfig::default();
        config.pattern.fps = 24.0;
        let args = Args::parse_from([
            "viewer",
            "--fps",
            "60",
            "--frame-size",
            "640x360",
            "--bottom-up",
            "--background-decode",
            "--no-skip-unchanged",
        ]);
        config.apply(&args);

        assert_eq!(config.pattern.fps, 60.0);
        assert_eq!((config.pattern.width, config.pattern.height), (640, 360));
        assert_eq!(config.pattern.row_order, RowOrder::BottomUp);
        assert!(config.background_decode);
        assert!(!config.presenter.skip_unchanged);
        assert_eq!(config.clock.refresh_hz, None);
    }

    #[test]
    fn frame_size_must_be_well_formed() {
        assert_eq!(parse_size("1920x1080"), Ok((1920, 1080)));
        assert!(parse_size("1920").is_err());
        assert!(parse_size("0x10").is_err());
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = ViewerConfig::load(Path::new("/nonexistent/viewer.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
