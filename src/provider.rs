//! Boundary traits for the collaborators this core treats as external: the
//! map data decoder, the styling engine and the GPU submission layer.

use nalgebra::Point2;

use crate::overlay::OverlayHandle;
use crate::shape::GeometryBucket;
use crate::tile::feature_index::FeatureId;
use crate::view::Rect;

/// One decoded map feature.
#[derive(Debug, Clone)]
pub struct Feature {
    /// Identity of the feature within its data segment.
    pub id: FeatureId,
    /// Feature geometry in map units.
    pub points: Vec<Point2<f64>>,
    /// Importance rank assigned by the data, used by the styling engine.
    pub rank: u8,
    /// Optional label text.
    pub label: Option<String>,
}

/// Source of map data. Implemented by the (excluded) on-disk format decoder.
/// Both methods are synchronous and are invoked only from tile-read worker
/// threads.
pub trait MapDataProvider: Send + Sync {
    /// Lists the features intersecting the given map rectangle at the given
    /// zoom level.
    fn read_feature_ids(&self, rect: &Rect, zoom: u8) -> Vec<FeatureId>;

    /// Reads full feature data for the given ids. Ids that fail to decode are
    /// silently omitted from the result.
    fn read_features(&self, ids: &[FeatureId]) -> Vec<Feature>;
}

/// Drawing instruction for one feature, produced by the styling engine.
#[derive(Debug, Clone)]
pub enum DrawRule {
    /// Fill the feature outline.
    Area {
        /// Depth within the target layer.
        depth: i32,
        /// Extrude into the 3d layer.
        is_3d: bool,
    },
    /// Stroke the feature geometry.
    Line {
        /// Stroke width in pixels.
        width: f32,
        /// Depth within the target layer.
        depth: i32,
    },
    /// Place a screen-space symbol at the feature's first point.
    Symbol {
        /// Placement priority; higher priority wins conflicts.
        priority: u16,
        /// Symbol box width in pixels.
        width: f64,
        /// Symbol box height in pixels.
        height: f64,
    },
}

/// The styling engine: a pure function from a feature to its draw rules.
/// An empty rule set means the feature is not drawn at this zoom level.
pub trait StyleEngine: Send + Sync {
    /// Resolves the draw rules for the feature at the given zoom level.
    fn draw_rules(&self, feature: &Feature, zoom: u8) -> Vec<DrawRule>;
}

/// Opaque graphics context acquired from the [`GraphicsContextFactory`] at
/// lifecycle transitions. Created and used on one renderer thread; the
/// `Send` bound only exists so the owning delegate can be moved into that
/// thread at spawn.
pub trait GraphicsContext: Send {
    /// Binds the context to the current thread.
    fn make_current(&mut self);

    /// Toggles the context's rendering flag. While disabled the context must
    /// not be presented to.
    fn set_rendering_enabled(&mut self, _enabled: bool) {}

    /// Submits one geometry batch for drawing.
    fn submit_bucket(&mut self, _bucket: &GeometryBucket) {}

    /// Submits one accepted overlay for drawing.
    fn submit_overlay(&mut self, _overlay: &OverlayHandle) {}

    /// Finishes the current frame.
    fn flush(&mut self);
}

/// Source of graphics contexts. The engine acquires one draw context for the
/// render thread and one upload context for the resource-upload thread; the
/// factory outlives both.
pub trait GraphicsContextFactory: Send + Sync {
    /// Creates the context used for frame drawing.
    fn draw_context(&self) -> Box<dyn GraphicsContext>;

    /// Creates the context used for resource upload.
    fn upload_context(&self) -> Box<dyn GraphicsContext>;
}
