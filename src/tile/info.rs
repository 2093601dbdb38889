//! The unit of work of the tile read pipeline: reading one tile.

use std::sync::atomic::{AtomicBool, Ordering};

use super::engine_context::EngineContext;
use super::feature_index::{FeatureId, MemoryFeatureIndex};
use super::TileKey;
use crate::error::ReadCanceled;
use crate::provider::{DrawRule, Feature, MapDataProvider, StyleEngine};
use crate::shape::{AreaShape, LineShape, MapShape, SymbolShape};

/// One tile read task, shared between the backend thread (which may cancel
/// it) and the worker thread executing it.
pub struct TileInfo {
    key: TileKey,
    buildings_3d: bool,
    canceled: AtomicBool,
}

impl TileInfo {
    /// Creates a task for the given tile.
    pub fn new(key: TileKey, buildings_3d: bool) -> Self {
        Self {
            key,
            buildings_3d,
            canceled: AtomicBool::new(false),
        }
    }

    /// Tile this task reads, generations included.
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// Marks the task as canceled. A queued task is skipped by its worker; a
    /// running task bails out at its next cancellation point.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Returns true once the task was canceled.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Reads the tile's features, turning them into shapes submitted to the
    /// context.
    ///
    /// The cancel flag is checked between every pipeline step and once per
    /// feature, so an outdated tile stops wasting its worker quickly. Feature
    /// ownership acquired from the index is released on every exit path.
    pub fn read_features(
        &self,
        provider: &dyn MapDataProvider,
        style: &dyn StyleEngine,
        index: &MemoryFeatureIndex,
        context: &mut EngineContext,
    ) -> Result<(), ReadCanceled> {
        self.check_canceled()?;

        let ids = provider.read_feature_ids(&self.key.map_rect(), self.key.zoom);
        self.check_canceled()?;

        let owned = index.read_features_request(&ids);
        let result = self.read_owned(&owned, provider, style, context);
        index.remove_features(&owned);
        result
    }

    fn read_owned(
        &self,
        owned: &[FeatureId],
        provider: &dyn MapDataProvider,
        style: &dyn StyleEngine,
        context: &mut EngineContext,
    ) -> Result<(), ReadCanceled> {
        self.check_canceled()?;

        let features = provider.read_features(owned);
        for feature in &features {
            self.check_canceled()?;
            for rule in style.draw_rules(feature, self.key.zoom) {
                if let Some(shape) = self.build_shape(feature, &rule) {
                    context.submit_shape(shape);
                }
            }
        }

        Ok(())
    }

    fn build_shape(&self, feature: &Feature, rule: &DrawRule) -> Option<MapShape> {
        match *rule {
            DrawRule::Area { depth, is_3d } => Some(MapShape::Area(AreaShape {
                points: feature.points.clone(),
                depth,
                // With buildings disabled the extrusion flattens into the
                // ground layer.
                is_3d: is_3d && self.buildings_3d,
            })),
            DrawRule::Line { width, depth } => Some(MapShape::Line(LineShape {
                points: feature.points.clone(),
                width,
                depth,
            })),
            DrawRule::Symbol {
                priority,
                width,
                height,
            } => {
                let anchor = *feature.points.first()?;
                Some(MapShape::Symbol(SymbolShape {
                    id: feature.id.as_u64(),
                    anchor,
                    half_width: width / 2.0,
                    half_height: height / 2.0,
                    priority,
                }))
            }
        }
    }

    fn check_canceled(&self) -> Result<(), ReadCanceled> {
        if self.is_canceled() {
            Err(ReadCanceled)
        } else {
            Ok(())
        }
    }
}
