//! User input events and their translation into camera changes.
//!
//! Events are posted from the UI thread through the engine, travel to the
//! render thread as messages and are applied between frames. Direct
//! manipulation (drag) changes the view immediately; animated requests go
//! through the animation system.

use std::time::Instant;

use nalgebra::{Point2, Rotation2, Vector2};

use crate::animation::{
    Animation, AnimationKind, AnimationSystem, KineticScrollAnimation, MapLinearAnimation,
    MapScaleAnimation,
};
use crate::view::{ScreenState, TILE_PIXEL_SIZE, WORLD_SIZE};

/// Duration of animated camera transitions, seconds.
const TRANSITION_DURATION: f64 = 0.25;

/// Minimum fling speed, pixels per second, to start a kinetic scroll.
const KINETIC_THRESHOLD: f64 = 60.0;

/// Maximum duration of a touch for it to count as a tap.
const TAP_TIMEOUT: f64 = 0.3;

/// Pointer travel, in pixels, beyond which a touch counts as a drag.
const DRAG_THRESHOLD: f64 = 3.0;

/// Phase of a touch gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPhase {
    /// Finger went down.
    Started,
    /// Finger moved.
    Moved,
    /// Finger went up.
    Ended,
}

/// One touch of a drag/tap gesture, position in screen pixels.
#[derive(Debug, Clone, Copy)]
pub struct TouchEvent {
    /// Gesture phase.
    pub phase: TouchPhase,
    /// Pointer position in pixels.
    pub position: Point2<f64>,
}

/// Zoom request anchored at a screen point.
#[derive(Debug, Clone, Copy)]
pub struct ScaleEvent {
    /// Screen point that must stay stationary while zooming.
    pub pixel_point: Point2<f64>,
    /// Zoom factor; values above 1.0 zoom in.
    pub factor: f64,
    /// Animate the transition instead of jumping.
    pub animated: bool,
}

/// Camera move request.
#[derive(Debug, Clone, Copy)]
pub struct SetCenterEvent {
    /// Target center in map units.
    pub center: Point2<f64>,
    /// Optional target zoom level.
    pub zoom: Option<u8>,
    /// Animate the transition instead of jumping.
    pub animated: bool,
}

/// Map rotation request.
#[derive(Debug, Clone, Copy)]
pub struct RotateEvent {
    /// Target rotation angle, radians.
    pub angle: f64,
}

/// User interaction event accepted by the engine.
#[derive(Debug, Clone, Copy)]
pub enum UserEvent {
    /// Touch gesture update.
    Touch(TouchEvent),
    /// Anchored zoom.
    Scale(ScaleEvent),
    /// Camera move.
    SetCenter(SetCenterEvent),
    /// Map rotation.
    Rotate(RotateEvent),
}

/// Result of applying one user event.
#[derive(Debug, Default)]
pub(crate) struct EventOutcome {
    /// The camera state changed and coverage must be re-evaluated.
    pub view_changed: bool,
    /// A tap was detected at the given pixel position.
    pub tap: Option<Point2<f64>>,
}

struct DragState {
    start_position: Point2<f64>,
    start_time: Instant,
    last_position: Point2<f64>,
    last_time: Instant,
    velocity: Vector2<f64>,
    moved: bool,
}

/// Per-render-thread state of the input gesture recognition.
pub(crate) struct UserEventStream {
    drag: Option<DragState>,
    kinetic_friction: f64,
}

impl UserEventStream {
    pub fn new(kinetic_friction: f64) -> Self {
        Self {
            drag: None,
            kinetic_friction,
        }
    }

    /// Applies one event to the view, possibly spawning animations.
    pub fn process(
        &mut self,
        event: UserEvent,
        screen: &mut ScreenState,
        animations: &mut AnimationSystem,
    ) -> EventOutcome {
        match event {
            UserEvent::Touch(touch) => self.process_touch(touch, screen, animations),
            UserEvent::Scale(scale) => self.process_scale(scale, screen, animations),
            UserEvent::SetCenter(center) => self.process_set_center(center, screen, animations),
            UserEvent::Rotate(rotate) => {
                screen.set_angle(rotate.angle);
                EventOutcome {
                    view_changed: true,
                    tap: None,
                }
            }
        }
    }

    fn process_touch(
        &mut self,
        touch: TouchEvent,
        screen: &mut ScreenState,
        animations: &mut AnimationSystem,
    ) -> EventOutcome {
        let mut outcome = EventOutcome::default();
        match touch.phase {
            TouchPhase::Started => {
                // A finger down takes over the camera from any running move.
                animations.finish_animations(AnimationKind::KineticScroll, false);
                animations.finish_animations(AnimationKind::MapLinear, false);
                animations.finish_animations(AnimationKind::MapScale, false);

                let now = Instant::now();
                self.drag = Some(DragState {
                    start_position: touch.position,
                    start_time: now,
                    last_position: touch.position,
                    last_time: now,
                    velocity: Vector2::zeros(),
                    moved: false,
                });
            }
            TouchPhase::Moved => {
                let Some(drag) = &mut self.drag else {
                    return outcome;
                };

                let delta = touch.position - drag.last_position;
                if !drag.moved
                    && (touch.position - drag.start_position).norm() < DRAG_THRESHOLD
                {
                    drag.last_position = touch.position;
                    return outcome;
                }
                drag.moved = true;

                let now = Instant::now();
                let dt = now.duration_since(drag.last_time).as_secs_f64().max(1e-4);
                // Exponentially smoothed pointer velocity, pixels per second.
                drag.velocity = drag.velocity * 0.6 + (delta / dt) * 0.4;
                drag.last_position = touch.position;
                drag.last_time = now;

                // The map follows the finger: shift the center the opposite
                // way in map units.
                let shift = Rotation2::new(screen.angle())
                    * Vector2::new(-delta.x * screen.scale(), delta.y * screen.scale());
                screen.set_position(screen.position() + shift);
                outcome.view_changed = true;
            }
            TouchPhase::Ended => {
                let Some(drag) = self.drag.take() else {
                    return outcome;
                };

                if drag.moved {
                    if drag.velocity.norm() >= KINETIC_THRESHOLD {
                        let velocity = Rotation2::new(screen.angle())
                            * Vector2::new(
                                -drag.velocity.x * screen.scale(),
                                drag.velocity.y * screen.scale(),
                            );
                        animations.add_animation(
                            Animation::KineticScroll(KineticScrollAnimation::new(
                                screen.position(),
                                velocity,
                                self.kinetic_friction,
                                screen.scale(),
                            )),
                            true,
                        );
                    }
                } else if drag.start_time.elapsed().as_secs_f64() <= TAP_TIMEOUT {
                    outcome.tap = Some(drag.start_position);
                }
            }
        }

        outcome
    }

    fn process_scale(
        &mut self,
        scale: ScaleEvent,
        screen: &mut ScreenState,
        animations: &mut AnimationSystem,
    ) -> EventOutcome {
        if scale.factor <= 0.0 {
            log::warn!("ignoring scale event with factor {}", scale.factor);
            return EventOutcome::default();
        }

        let to_scale = screen.scale() / scale.factor;
        let anchor_map = screen.screen_to_map(scale.pixel_point);

        // Keep the map point under the anchor pixel stationary.
        let size = screen.size();
        let rel = Vector2::new(
            (scale.pixel_point.x - size.width / 2.0) * to_scale,
            (size.height / 2.0 - scale.pixel_point.y) * to_scale,
        );
        let to_position = anchor_map - Rotation2::new(screen.angle()) * rel;

        if scale.animated {
            animations.add_animation(
                Animation::MapScale(MapScaleAnimation::new(
                    screen.scale(),
                    to_scale,
                    screen.position(),
                    to_position,
                    TRANSITION_DURATION,
                )),
                true,
            );
            EventOutcome::default()
        } else {
            screen.set_scale(to_scale);
            screen.set_position(to_position);
            EventOutcome {
                view_changed: true,
                tap: None,
            }
        }
    }

    fn process_set_center(
        &mut self,
        event: SetCenterEvent,
        screen: &mut ScreenState,
        animations: &mut AnimationSystem,
    ) -> EventOutcome {
        let to_scale = event
            .zoom
            .map(|zoom| WORLD_SIZE / (TILE_PIXEL_SIZE * (1u64 << zoom) as f64))
            .unwrap_or_else(|| screen.scale());

        if event.animated {
            let animation = if event.zoom.is_some() {
                Animation::MapScale(MapScaleAnimation::new(
                    screen.scale(),
                    to_scale,
                    screen.position(),
                    event.center,
                    TRANSITION_DURATION,
                ))
            } else {
                Animation::MapLinear(MapLinearAnimation::new(
                    screen.position(),
                    event.center,
                    TRANSITION_DURATION,
                ))
            };
            animations.add_animation(animation, true);
            EventOutcome::default()
        } else {
            screen.set_position(event.center);
            screen.set_scale(to_scale);
            EventOutcome {
                view_changed: true,
                tap: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::ScreenSize;
    use approx::assert_abs_diff_eq;

    fn screen() -> ScreenState {
        ScreenState::new(Point2::new(0.0, 0.0), 2.0, ScreenSize::new(800.0, 600.0))
    }

    #[test]
    fn drag_pans_the_map_against_the_pointer() {
        let mut stream = UserEventStream::new(4.0);
        let mut screen = screen();
        let mut animations = AnimationSystem::new();

        for (phase, x) in [
            (TouchPhase::Started, 100.0),
            (TouchPhase::Moved, 110.0),
            (TouchPhase::Moved, 120.0),
        ] {
            stream.process(
                UserEvent::Touch(TouchEvent {
                    phase,
                    position: Point2::new(x, 50.0),
                }),
                &mut screen,
                &mut animations,
            );
        }

        // 20 px right at 2 map units per pixel moves the center 40 units left.
        assert_abs_diff_eq!(screen.position().x, -40.0, epsilon = 1e-9);
        assert_abs_diff_eq!(screen.position().y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn quick_touch_without_movement_is_a_tap() {
        let mut stream = UserEventStream::new(4.0);
        let mut screen = screen();
        let mut animations = AnimationSystem::new();

        stream.process(
            UserEvent::Touch(TouchEvent {
                phase: TouchPhase::Started,
                position: Point2::new(100.0, 100.0),
            }),
            &mut screen,
            &mut animations,
        );
        let outcome = stream.process(
            UserEvent::Touch(TouchEvent {
                phase: TouchPhase::Ended,
                position: Point2::new(100.0, 100.0),
            }),
            &mut screen,
            &mut animations,
        );

        assert_eq!(outcome.tap, Some(Point2::new(100.0, 100.0)));
        assert!(!outcome.view_changed);
    }

    #[test]
    fn anchored_scale_keeps_the_anchor_point_fixed() {
        let mut stream = UserEventStream::new(4.0);
        let mut screen = screen();
        let mut animations = AnimationSystem::new();

        let anchor = Point2::new(600.0, 150.0);
        let before = screen.screen_to_map(anchor);

        let outcome = stream.process(
            UserEvent::Scale(ScaleEvent {
                pixel_point: anchor,
                factor: 2.0,
                animated: false,
            }),
            &mut screen,
            &mut animations,
        );

        assert!(outcome.view_changed);
        assert_abs_diff_eq!(screen.scale(), 1.0, epsilon = 1e-12);
        let after = screen.screen_to_map(anchor);
        assert_abs_diff_eq!(before.x, after.x, epsilon = 1e-6);
        assert_abs_diff_eq!(before.y, after.y, epsilon = 1e-6);
    }

    #[test]
    fn animated_set_center_spawns_an_animation() {
        let mut stream = UserEventStream::new(4.0);
        let mut screen = screen();
        let mut animations = AnimationSystem::new();

        stream.process(
            UserEvent::SetCenter(SetCenterEvent {
                center: Point2::new(500.0, 500.0),
                zoom: None,
                animated: true,
            }),
            &mut screen,
            &mut animations,
        );

        assert!(animations.has_animations());
        animations.advance(1.0);
        assert!(!animations.has_animations());
        let value = animations.get_property(
            crate::animation::AnimObject::MapPlane,
            crate::animation::AnimProperty::Position,
        );
        assert!(matches!(
            value,
            Some(crate::animation::PropertyValue::Position(p)) if p.x == 500.0
        ));
    }

    #[test]
    fn fast_fling_starts_a_kinetic_scroll() {
        let mut stream = UserEventStream::new(4.0);
        let mut screen = screen();
        let mut animations = AnimationSystem::new();

        stream.process(
            UserEvent::Touch(TouchEvent {
                phase: TouchPhase::Started,
                position: Point2::new(0.0, 0.0),
            }),
            &mut screen,
            &mut animations,
        );
        for i in 1..=5 {
            stream.process(
                UserEvent::Touch(TouchEvent {
                    phase: TouchPhase::Moved,
                    position: Point2::new(i as f64 * 30.0, 0.0),
                }),
                &mut screen,
                &mut animations,
            );
        }
        stream.process(
            UserEvent::Touch(TouchEvent {
                phase: TouchPhase::Ended,
                position: Point2::new(150.0, 0.0),
            }),
            &mut screen,
            &mut animations,
        );

        assert!(animations.has_animations(), "fling did not start kinetic scroll");
    }
}
