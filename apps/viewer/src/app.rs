use std::sync::Arc;

use anyhow::{Context, Result};
use frame_source::{BackgroundSource, FrameSource, TestPatternDecoder, TestPatternSource};
use parking_lot::Mutex;
use playback::{
    ClockConfig, FrameLoop, FrameMailbox, PlatformDisplayClock, PumpStats, ThreadedDisplayClock,
};
use renderer::{Presenter, RendererError, WgpuContext, WgpuDevice, WgpuSurface};
use tracing::{debug, error, info, trace, warn};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoopProxy};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::config::ViewerConfig;

#[derive(Debug, Clone, Copy)]
pub enum UserEvent {
    /// The frame pump published this sequence.
    FrameAvailable(u64),
}

enum ActiveLoop {
    Platform(FrameLoop<PlatformDisplayClock>),
    Fallback(FrameLoop<ThreadedDisplayClock>),
}

impl ActiveLoop {
    fn stop(&self) {
        match self {
            ActiveLoop::Platform(frame_loop) => frame_loop.stop(),
            ActiveLoop::Fallback(frame_loop) => frame_loop.stop(),
        }
    }

    fn stats(&self) -> &Arc<PumpStats> {
        match self {
            ActiveLoop::Platform(frame_loop) => frame_loop.stats(),
            ActiveLoop::Fallback(frame_loop) => frame_loop.stats(),
        }
    }
}

// field order is drop order: the loop stops before the surface goes, the window last
struct Viewer {
    frame_loop: ActiveLoop,
    presenter: Presenter<WgpuDevice>,
    surface: WgpuSurface,
    window: Arc<Window>,
}

pub struct ViewerApp {
    config: ViewerConfig,
    proxy: Arc<Mutex<EventLoopProxy<UserEvent>>>,
    viewer: Option<Viewer>,
    error: Option<anyhow::Error>,
}

impl ViewerApp {
    pub fn new(config: ViewerConfig, proxy: EventLoopProxy<UserEvent>) -> Self {
        Self {
            config,
            proxy: Arc::new(Mutex::new(proxy)),
            viewer: None,
            error: None,
        }
    }

    /// The error that ended the event loop, if any.
    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.shutdown();
        self.error = Some(err);
        event_loop.exit();
    }

    fn init(&self, event_loop: &ActiveEventLoop) -> Result<Viewer> {
        let attributes = Window::default_attributes()
            .with_title(self.config.window.title.clone())
            .with_inner_size(LogicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .context("failed to create window")?,
        );

        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(RendererError::from)
            .context("failed to create surface")?;
        let context = pollster::block_on(WgpuContext::new(instance, Some(&surface)))
            .context("failed to initialise gpu")?;
        let size = window.inner_size();
        let surface = WgpuSurface::new(surface, &context, size.width, size.height)
            .context("failed to configure surface")?;
        let device = Arc::new(WgpuDevice::from_context(&context, surface.format()));

        let mailbox = Arc::new(FrameMailbox::new());
        let proxy = Arc::clone(&self.proxy);
        mailbox.on_frame_available(move |sequence| {
            // fails only once the event loop is gone
            let _ = proxy.lock().send_event(UserEvent::FrameAvailable(sequence));
        });

        let presenter = Presenter::with_shared_pipelines(
            device,
            Arc::clone(&mailbox),
            self.config.presenter.clone(),
        );
        presenter
            .prepare()
            .context("presentation pipeline failed to compile")?;

        let mut clock = self.config.clock.clone();
        if clock.refresh_hz.is_none() {
            clock.refresh_hz = window
                .current_monitor()
                .and_then(|monitor| monitor.refresh_rate_millihertz())
                .map(|millihertz| millihertz as f64 / 1000.0);
        }
        let frame_loop = start_frame_loop(&self.config, clock, mailbox)?;

        Ok(Viewer {
            frame_loop,
            presenter,
            surface,
            window,
        })
    }

    fn shutdown(&mut self) {
        let Some(viewer) = self.viewer.take() else {
            return;
        };
        viewer.frame_loop.stop();
        let pump = viewer.frame_loop.stats();
        let presenter = viewer.presenter.stats();
        let bridge = viewer.presenter.bridge_stats();
        debug!(
            ticks = pump.ticks(),
            published = pump.published(),
            idle = pump.idle(),
            presented = presenter.presented,
            blank = presenter.blank,
            skipped_unchanged = presenter.skipped_unchanged,
            skipped_texture = presenter.skipped_texture,
            skipped_drawable = presenter.skipped_drawable,
            uploads = bridge.uploads,
            imports = bridge.imports,
            texture_hits = bridge.hits,
            "viewer shutting down"
        );
    }
}

fn make_source(config: &ViewerConfig) -> Result<Box<dyn FrameSource>> {
    if config.background_decode {
        let decoder = TestPatternDecoder::new(config.pattern.clone());
        let source = BackgroundSource::spawn(decoder).context("failed to start decode worker")?;
        Ok(Box::new(source))
    } else {
        Ok(Box::new(TestPatternSource::new(config.pattern.clone())))
    }
}

/// Platform clock first; a timer thread if the display link cannot be created.
fn start_frame_loop(
    config: &ViewerConfig,
    clock: ClockConfig,
    mailbox: Arc<FrameMailbox>,
) -> Result<ActiveLoop> {
    let platform = PlatformDisplayClock::new(clock.clone());
    match FrameLoop::start(platform, make_source(config)?, Arc::clone(&mailbox)) {
        Ok(frame_loop) => {
            info!(refresh_hz = ?clock.refresh_hz, "frame loop running on platform clock");
            Ok(ActiveLoop::Platform(frame_loop))
        }
        Err(err) => {
            warn!(%err, "platform display clock unavailable; using timer thread");
            let fallback = ThreadedDisplayClock::new(clock);
            let frame_loop = FrameLoop::start(fallback, make_source(config)?, mailbox)
                .context("failed to start display clock")?;
            Ok(ActiveLoop::Fallback(frame_loop))
        }
    }
}

impl ApplicationHandler<UserEvent> for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewer.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(viewer) => {
                viewer.window.request_redraw();
                self.viewer = Some(viewer);
            }
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: UserEvent) {
        let UserEvent::FrameAvailable(sequence) = event;
        if let Some(viewer) = &self.viewer {
            if viewer.presenter.has_pending_frame() {
                trace!(sequence, "requesting redraw");
                viewer.window.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(viewer) = self.viewer.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if viewer.surface.resize(size.width, size.height) {
                    viewer.presenter.invalidate();
                    viewer.window.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                match viewer.presenter.render(&mut viewer.surface) {
                    Ok(outcome) => {
                        trace!(?outcome, "redraw");
                        // an idle source publishes nothing more, so nothing else would wake us
                        if outcome.should_retry() && viewer.presenter.has_pending_frame() {
                            viewer.window.request_redraw();
                        }
                    }
                    Err(err) => {
                        let err = anyhow::Error::new(err).context("presentation failed");
                        self.fail(event_loop, err);
                    }
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}
