//! The frontend (render) thread delegate: frame composition.
//!
//! Each frame the frontend drains its message queue under a time budget,
//! advances camera animations, recomputes the tile coverage when the view
//! changed and submits the render groups in layer order with collision-free
//! overlays on top.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nalgebra::Point2;

use super::render_group::{draw_order, RenderGroup};
use crate::animation::{AnimObject, AnimProperty, AnimationSystem, PropertyValue};
use crate::lifecycle::RendererDelegate;
use crate::messaging::{Message, MessageQueue, PopOutcome, Priority, ThreadCommutator, ThreadName};
use crate::overlay::{OverlayHandle, OverlayTree};
use crate::provider::GraphicsContext;
use crate::shape::{GeometryBucket, RenderLayer};
use crate::tile::requested::{RequestedTiles, TileRequest};
use crate::tile::TileKey;
use crate::user_event::UserEventStream;
use crate::view::ScreenState;

/// A detected tap, reported to the application.
#[derive(Debug, Clone, Copy)]
pub struct TapEventInfo {
    /// Tap position in screen pixels.
    pub pixel: Point2<f64>,
    /// Tap position in map units.
    pub map: Point2<f64>,
}

/// Application callbacks invoked from the render thread.
#[derive(Default)]
pub struct Listeners {
    /// Called when a tap gesture is recognized.
    pub on_tap: Option<Box<dyn FnMut(TapEventInfo) + Send>>,
    /// Called after each frame whose camera state differs from the previous
    /// one.
    pub on_view_changed: Option<Box<dyn FnMut(&ScreenState) + Send>>,
}

/// Delegate of the render thread.
pub struct FrontendRenderer {
    commutator: Arc<ThreadCommutator>,
    requested: Arc<RequestedTiles>,
    context: Option<Box<dyn GraphicsContext>>,
    screen: ScreenState,
    animations: AnimationSystem,
    user_events: UserEventStream,
    overlay_tree: OverlayTree,
    groups: Vec<RenderGroup>,
    /// Overlay handles per tile of the current coverage.
    overlays: Vec<(TileKey, Vec<OverlayHandle>)>,
    /// Tiles whose read completed; a further flush for such a tile is a
    /// re-read and replaces the tile's groups.
    finalized: BTreeSet<TileKey>,
    coverage: BTreeSet<TileKey>,
    generation: u64,
    user_marks_generation: u64,
    buildings_3d: bool,
    view_changed: bool,
    force_refresh: bool,
    frame_budget: Duration,
    last_frame: Instant,
    listeners: Listeners,
}

impl FrontendRenderer {
    /// Creates the frontend state.
    pub fn new(
        commutator: Arc<ThreadCommutator>,
        requested: Arc<RequestedTiles>,
        frame_budget: Duration,
        overlap_tolerance: f64,
        kinetic_friction: f64,
        listeners: Listeners,
    ) -> Self {
        Self {
            commutator,
            requested,
            context: None,
            screen: ScreenState::default(),
            animations: AnimationSystem::new(),
            user_events: UserEventStream::new(kinetic_friction),
            overlay_tree: OverlayTree::new(overlap_tolerance),
            groups: Vec::new(),
            overlays: Vec::new(),
            finalized: BTreeSet::new(),
            coverage: BTreeSet::new(),
            generation: 0,
            user_marks_generation: 0,
            buildings_3d: false,
            view_changed: false,
            force_refresh: false,
            frame_budget,
            last_frame: Instant::now(),
            listeners,
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::FlushTile { key, bucket } => self.on_flush_tile(key, bucket),
            Message::FlushOverlays { key, handles } => self.on_flush_overlays(key, handles),
            Message::Resize(size) => {
                if size != self.screen.size() {
                    self.screen.set_size(size);
                    self.view_changed = true;
                }
            }
            Message::UserEvent(event) => {
                let outcome =
                    self.user_events
                        .process(event, &mut self.screen, &mut self.animations);
                self.view_changed |= outcome.view_changed;
                if let (Some(pixel), Some(listener)) = (outcome.tap, &mut self.listeners.on_tap) {
                    listener(TapEventInfo {
                        pixel,
                        map: self.screen.screen_to_map(pixel),
                    });
                }
            }
            Message::SetBuildings3d(enabled) => {
                if enabled != self.buildings_3d {
                    self.buildings_3d = enabled;
                    self.force_refresh = true;
                }
            }
            Message::ForceRefresh { update_user_marks } => {
                if update_user_marks {
                    self.user_marks_generation += 1;
                }
                self.force_refresh = true;
            }
            Message::FinishReading => {
                log::debug!("coverage fully read");
            }
            other => {
                log::trace!("frontend ignoring message {other:?}");
            }
        }
    }

    fn on_flush_tile(&mut self, key: TileKey, bucket: GeometryBucket) {
        if !self.is_current(&key) {
            log::trace!("dropping geometry of superseded tile {key:?}");
            return;
        }

        // A flush after the tile was finalized is a re-read (data
        // invalidation); the previous groups of the tile are replaced.
        if self.finalized.get(&key).is_some_and(|f| f.strict_eq(&key)) {
            self.finalized.remove(&key);
            for group in &mut self.groups {
                if group.key().strict_eq(&key) {
                    group.mark_for_deletion();
                }
            }
        }

        let state = bucket.state;
        let existing = self
            .groups
            .iter_mut()
            .find(|g| !g.is_pending_delete() && g.state() == state && g.key().strict_eq(&key));
        match existing {
            Some(group) => group.add_bucket(bucket),
            None => {
                let mut group = RenderGroup::new(state, key);
                group.add_bucket(bucket);
                self.groups.push(group);
            }
        }
    }

    fn on_flush_overlays(&mut self, key: TileKey, handles: Vec<OverlayHandle>) {
        if !self.is_current(&key) {
            return;
        }

        match self.overlays.iter_mut().find(|(k, _)| k.strict_eq(&key)) {
            Some((_, existing)) => *existing = handles,
            None => self.overlays.push((key, handles)),
        }
        self.finalized.replace(key);
    }

    fn is_current(&self, key: &TileKey) -> bool {
        self.coverage.get(key).is_some_and(|c| c.strict_eq(key))
    }

    /// Drops the groups scheduled for deletion during the previous frame.
    fn reap(&mut self) {
        self.groups.retain(|group| !group.is_pending_delete());
    }

    fn advance_animations(&mut self, dt: f64) {
        if !self.animations.has_animations() {
            self.animations.take_events();
            return;
        }

        self.animations.advance(dt);
        if let Some(PropertyValue::Position(position)) = self
            .animations
            .get_property(AnimObject::MapPlane, AnimProperty::Position)
        {
            self.screen.set_position(position);
        }
        if let Some(PropertyValue::Scale(scale)) = self
            .animations
            .get_property(AnimObject::MapPlane, AnimProperty::Scale)
        {
            self.screen.set_scale(scale);
        }
        if let Some(PropertyValue::Angle(angle)) = self
            .animations
            .get_property(AnimObject::MapPlane, AnimProperty::Angle)
        {
            self.screen.set_angle(angle);
        }
        if let Some(PropertyValue::Perspective(perspective)) = self
            .animations
            .get_property(AnimObject::MapPlane, AnimProperty::Perspective)
        {
            self.screen.set_perspective(perspective);
        }

        self.view_changed = true;
        self.animations.take_events();
    }

    /// Recomputes the visible tile set and ships it to the backend.
    ///
    /// Tiles that stay visible keep their generation stamps, so geometry
    /// already read for them remains valid. Incoming tiles (and, on a forced
    /// pass, every tile) are stamped with a fresh generation.
    fn resolve_coverage(&mut self, force: bool) {
        if self.screen.size().is_empty() {
            return;
        }

        let zoom = self.screen.zoom_level();
        let zoom_changed = self.coverage.first().map(|t| t.zoom) != Some(zoom);
        self.generation += 1;

        let mut new_coverage = BTreeSet::new();
        for (x, y) in self.screen.visible_tiles(zoom) {
            let plain = TileKey::new(x, y, zoom);
            let key = match self.coverage.get(&plain) {
                Some(existing) if !force && !zoom_changed => *existing,
                _ => plain.with_generation(self.generation, self.user_marks_generation),
            };
            new_coverage.insert(key);
        }

        for group in &mut self.groups {
            let keep = new_coverage
                .get(&group.key())
                .is_some_and(|k| k.strict_eq(&group.key()));
            if !keep {
                group.mark_for_deletion();
            }
        }
        self.overlays
            .retain(|(key, _)| new_coverage.get(key).is_some_and(|k| k.strict_eq(key)));
        let finalized = std::mem::take(&mut self.finalized);
        self.finalized = finalized
            .into_iter()
            .filter(|key| new_coverage.get(key).is_some_and(|k| k.strict_eq(key)))
            .collect();

        self.coverage = new_coverage.clone();
        self.requested.set(TileRequest {
            tiles: new_coverage,
            screen: self.screen.clone(),
            buildings_3d: self.buildings_3d,
            force_refresh: force,
        });
        self.commutator.post(
            ThreadName::ResourceUpload,
            Priority::Normal,
            Message::UpdateReadManager,
        );
    }

    fn draw(&mut self) {
        let Some(context) = self.context.as_mut() else {
            return;
        };

        self.groups.sort_by(draw_order);

        let handles: Vec<OverlayHandle> = self
            .overlays
            .iter()
            .flat_map(|(_, handles)| handles.iter().cloned())
            .collect();
        let accepted = self.overlay_tree.place(&handles, &self.screen);

        let live = |group: &&RenderGroup| !group.is_pending_delete();
        for group in self
            .groups
            .iter()
            .filter(live)
            .filter(|g| g.state().layer == RenderLayer::Geometry)
        {
            for bucket in group.buckets() {
                context.submit_bucket(bucket);
            }
        }

        for id in accepted {
            if let Some(handle) = handles.iter().find(|h| h.id == id) {
                context.submit_overlay(handle);
            }
        }

        for group in self
            .groups
            .iter()
            .filter(live)
            .filter(|g| g.state().layer == RenderLayer::Geometry3d)
        {
            for bucket in group.buckets() {
                context.submit_bucket(bucket);
            }
        }

        context.flush();
    }

    #[cfg(test)]
    pub(crate) fn coverage(&self) -> &BTreeSet<TileKey> {
        &self.coverage
    }

    #[cfg(test)]
    pub(crate) fn live_group_count(&self) -> usize {
        self.groups.iter().filter(|g| !g.is_pending_delete()).count()
    }
}

impl RendererDelegate for FrontendRenderer {
    fn frame(&mut self, queue: &MessageQueue) {
        let frame_start = Instant::now();
        let dt = frame_start
            .duration_since(self.last_frame)
            .as_secs_f64()
            .min(0.25);
        self.last_frame = frame_start;

        self.reap();

        // An idle frame blocks for the first message; a busy one (animation
        // running or coverage pending) only takes what is already there.
        let deadline = frame_start + self.frame_budget;
        let idle = !self.animations.has_animations() && !self.view_changed && !self.force_refresh;
        let first = if idle {
            match queue.pop_blocking(Some(self.frame_budget)) {
                PopOutcome::Message(message) => Some(message),
                PopOutcome::TimedOut | PopOutcome::Closed => None,
            }
        } else {
            queue.try_pop()
        };

        if let Some(message) = first {
            self.handle_message(message);
            while Instant::now() < deadline {
                let Some(message) = queue.try_pop() else {
                    break;
                };
                self.handle_message(message);
            }
        }

        self.advance_animations(dt);

        let force = std::mem::take(&mut self.force_refresh);
        if std::mem::take(&mut self.view_changed) || force {
            self.resolve_coverage(force);
            if let Some(listener) = &mut self.listeners.on_view_changed {
                listener(&self.screen);
            }
        }

        self.draw();
    }

    fn on_context_create(&mut self, context: Box<dyn GraphicsContext>) {
        self.context = Some(context);
    }

    fn on_context_destroy(&mut self) {
        // GPU-side state dies with the context; re-read everything once a
        // new context shows up.
        self.context = None;
        self.groups.clear();
        self.overlays.clear();
        self.finalized.clear();
        self.coverage.clear();
        self.force_refresh = true;
    }

    fn release_resources(&mut self) {
        self.groups.clear();
        self.overlays.clear();
        self.finalized.clear();
    }
}
