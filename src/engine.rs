//! The engine facade: thread wiring and the application-facing API.

use std::sync::Arc;
use std::time::Duration;

use crate::error::MercatorError;
use crate::lifecycle::{ContextKind, RendererThread};
use crate::messaging::{Message, Priority, ThreadCommutator, ThreadName};
use crate::provider::{GraphicsContextFactory, MapDataProvider, StyleEngine};
use crate::renderer::{BackendRenderer, FrontendRenderer, Listeners};
use crate::tile::requested::RequestedTiles;
use crate::user_event::UserEvent;
use crate::view::{Rect, ScreenSize};

/// Tunables of the engine.
#[derive(Debug, Clone)]
pub struct EngineParams {
    /// Per-frame budget for message processing on the render thread.
    pub frame_budget: Duration,
    /// Fraction of the smaller box two overlays may share before they
    /// collide. 0.0 means any overlap is a collision.
    pub overlap_tolerance: f64,
    /// Size of the tile read worker pool. Unset means all cores minus the
    /// two engine threads.
    pub pool_size: Option<usize>,
    /// Exponential decay rate of the post-fling deceleration, per second.
    pub kinetic_friction: f64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            frame_budget: Duration::from_millis(14),
            overlap_tolerance: 0.0,
            pool_size: None,
            kinetic_friction: 4.0,
        }
    }
}

/// The rendering engine.
///
/// Owns the two renderer threads and the commutator wiring them together.
/// All methods may be called from any thread; they translate into messages
/// and return without waiting, except for the lifecycle transitions which
/// block until acknowledged.
pub struct Engine {
    commutator: Arc<ThreadCommutator>,
    render: Arc<RendererThread>,
    upload: Arc<RendererThread>,
}

impl Engine {
    /// Wires up and starts the engine with rendering disabled. Call
    /// [`set_rendering_enabled`](Self::set_rendering_enabled) once a drawing
    /// surface exists.
    pub fn new(
        provider: Arc<dyn MapDataProvider>,
        style: Arc<dyn StyleEngine>,
        factory: Arc<dyn GraphicsContextFactory>,
        params: EngineParams,
        listeners: Listeners,
    ) -> Result<Self, MercatorError> {
        let commutator = Arc::new(ThreadCommutator::new());
        let requested = Arc::new(RequestedTiles::new());

        let frontend = FrontendRenderer::new(
            Arc::clone(&commutator),
            Arc::clone(&requested),
            params.frame_budget,
            params.overlap_tolerance,
            params.kinetic_friction,
            listeners,
        );
        let backend = BackendRenderer::new(
            Arc::clone(&commutator),
            requested,
            provider,
            style,
            params.pool_size,
        )
        .map_err(|error| {
            MercatorError::Generic(format!("failed to spawn tile read pool: {error}"))
        })?;

        let render = Arc::new(
            RendererThread::spawn("render", ContextKind::Draw, Arc::clone(&factory), frontend)
                .map_err(|error| {
                    MercatorError::Generic(format!("failed to spawn render thread: {error}"))
                })?,
        );
        let upload = Arc::new(
            RendererThread::spawn("resource-upload", ContextKind::Upload, factory, backend)
                .map_err(|error| {
                    MercatorError::Generic(format!("failed to spawn upload thread: {error}"))
                })?,
        );

        commutator.register_thread(ThreadName::Render, Arc::clone(&render) as _);
        commutator.register_thread(ThreadName::ResourceUpload, Arc::clone(&upload) as _);

        Ok(Self {
            commutator,
            render,
            upload,
        })
    }

    /// Turns rendering on or off, blocking until both threads acknowledged.
    ///
    /// Enabling creates fresh graphics contexts; disabling destroys them and
    /// holds back context-dependent messages until the next enable.
    pub fn set_rendering_enabled(&self, enabled: bool) -> Result<(), MercatorError> {
        if enabled {
            // Upload first so resources posted by early reads have a home.
            self.upload.set_rendering_enabled(true)?;
            self.render.set_rendering_enabled(true)
        } else {
            self.render.set_rendering_enabled(false)?;
            self.upload.set_rendering_enabled(false)
        }
    }

    /// Reports a new size of the drawing surface.
    pub fn resize(&self, size: ScreenSize) {
        // Resizes jump the queue so the very next frame uses the new
        // viewport.
        self.commutator
            .post(ThreadName::Render, Priority::High, Message::Resize(size));
    }

    /// Posts a user interaction event.
    pub fn post_user_event(&self, event: UserEvent) {
        self.commutator.post(
            ThreadName::Render,
            Priority::Normal,
            Message::UserEvent(event),
        );
    }

    /// Announces a map data change inside the rectangle; finished tiles
    /// intersecting it are re-read.
    pub fn invalidate_rect(&self, rect: Rect) {
        self.commutator.post(
            ThreadName::ResourceUpload,
            Priority::Normal,
            Message::InvalidateReadManagerRect(rect),
        );
    }

    /// Toggles 3d buildings. Flipping the flag re-reads the coverage.
    pub fn set_buildings_3d(&self, enabled: bool) {
        self.commutator.post(
            ThreadName::Render,
            Priority::Normal,
            Message::SetBuildings3d(enabled),
        );
    }

    /// Drops all rendered tiles and re-reads the current coverage.
    pub fn force_refresh(&self) {
        self.commutator.post(
            ThreadName::Render,
            Priority::Normal,
            Message::ForceRefresh {
                update_user_marks: false,
            },
        );
    }

    /// Announces changed user mark data; the coverage is re-read with a new
    /// user-marks generation.
    pub fn update_user_marks(&self) {
        self.commutator.post(
            ThreadName::Render,
            Priority::Normal,
            Message::ForceRefresh {
                update_user_marks: true,
            },
        );
    }

    /// Stops both threads, draining their queues. Idempotent; also runs on
    /// drop.
    pub fn stop(&self) {
        self.render.stop();
        self.upload.stop();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
