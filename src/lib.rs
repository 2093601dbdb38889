//! Concurrent rendering core of a pannable, zoomable vector map.
//!
//! The engine splits work across two long-lived threads plus a tile read
//! pool, all communicating exclusively through messages:
//!
//! * the **render** thread composes frames: it drains its message queue
//!   under a time budget, advances camera animations, recomputes the visible
//!   tile coverage and submits geometry in layer order with collision-free
//!   overlays on top;
//! * the **resource upload** thread reconciles coverage requests into the
//!   tile read pipeline and watches for its completion;
//! * **tile read workers** turn map features into draw-ready geometry,
//!   deduplicating cross-tile features through a shared ownership index and
//!   honoring cancellation when the camera moves on.
//!
//! The map data decoder, the styling rules and the GPU layer are external
//! collaborators behind the traits in [`provider`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mercator::{Engine, EngineParams, Listeners, ScreenSize};
//! # fn collaborators() -> (
//! #     Arc<dyn mercator::MapDataProvider>,
//! #     Arc<dyn mercator::StyleEngine>,
//! #     Arc<dyn mercator::GraphicsContextFactory>,
//! # ) { unimplemented!() }
//!
//! # fn main() -> Result<(), mercator::MercatorError> {
//! let (provider, style, factory) = collaborators();
//! let engine = Engine::new(
//!     provider,
//!     style,
//!     factory,
//!     EngineParams::default(),
//!     Listeners::default(),
//! )?;
//!
//! engine.set_rendering_enabled(true)?;
//! engine.resize(ScreenSize::new(1024.0, 768.0));
//! # Ok(())
//! # }
//! ```

pub mod animation;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod messaging;
pub mod overlay;
pub mod provider;
pub mod renderer;
pub mod shape;
pub mod tile;
pub mod user_event;
pub mod view;

pub use engine::{Engine, EngineParams};
pub use error::MercatorError;
pub use provider::{
    DrawRule, Feature, GraphicsContext, GraphicsContextFactory, MapDataProvider, StyleEngine,
};
pub use renderer::{Listeners, TapEventInfo};
pub use tile::TileKey;
pub use user_event::{
    RotateEvent, ScaleEvent, SetCenterEvent, TouchEvent, TouchPhase, UserEvent,
};
pub use view::{Rect, ScreenSize, ScreenState};
