//! The closed set of camera animation variants.

use nalgebra::{Point2, Vector2};

/// Object a property belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimObject {
    /// The map plane camera.
    MapPlane,
    /// The current-position arrow.
    Arrow,
}

/// Animatable property of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimProperty {
    /// Center position, map units.
    Position,
    /// Scale, map units per pixel.
    Scale,
    /// Rotation angle, radians.
    Angle,
    /// Perspective tilt angle, radians.
    Perspective,
}

/// Snapshot of an animated property value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    /// A position value.
    Position(Point2<f64>),
    /// A scale value.
    Scale(f64),
    /// An angle value.
    Angle(f64),
    /// A perspective tilt value.
    Perspective(f64),
}

/// Discriminant of an [`Animation`] variant, used to address animations in
/// bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationKind {
    /// See [`Animation::MapLinear`].
    MapLinear,
    /// See [`Animation::MapScale`].
    MapScale,
    /// See [`Animation::MapFollow`].
    MapFollow,
    /// See [`Animation::Perspective`].
    Perspective,
    /// See [`Animation::Arrow`].
    Arrow,
    /// See [`Animation::KineticScroll`].
    KineticScroll,
    /// See [`Animation::Sequence`].
    Sequence,
    /// See [`Animation::Parallel`].
    Parallel,
}

fn ease(t: f64) -> f64 {
    // Smoothstep; the original easing of the camera transitions.
    t * t * (3.0 - 2.0 * t)
}

fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

fn lerp_point(from: Point2<f64>, to: Point2<f64>, t: f64) -> Point2<f64> {
    from + (to - from) * t
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    elapsed: f64,
    duration: f64,
}

impl Timing {
    fn new(duration: f64) -> Self {
        Self {
            elapsed: 0.0,
            duration: duration.max(0.0),
        }
    }

    fn advance(&mut self, dt: f64) {
        self.elapsed += dt;
    }

    fn progress(&self) -> f64 {
        if self.duration == 0.0 {
            1.0
        } else {
            ease((self.elapsed / self.duration).clamp(0.0, 1.0))
        }
    }

    fn is_finished(&self) -> bool {
        self.elapsed >= self.duration
    }
}

/// Linear camera move.
#[derive(Debug, Clone)]
pub struct MapLinearAnimation {
    timing: Timing,
    from: Point2<f64>,
    to: Point2<f64>,
}

impl MapLinearAnimation {
    /// Moves the camera from `from` to `to` over `duration` seconds.
    pub fn new(from: Point2<f64>, to: Point2<f64>, duration: f64) -> Self {
        Self {
            timing: Timing::new(duration),
            from,
            to,
        }
    }
}

/// Camera zoom, optionally combined with a position shift that keeps a fixed
/// screen point stationary.
#[derive(Debug, Clone)]
pub struct MapScaleAnimation {
    timing: Timing,
    from_scale: f64,
    to_scale: f64,
    from_position: Point2<f64>,
    to_position: Point2<f64>,
}

impl MapScaleAnimation {
    /// Scales the camera between the given states over `duration` seconds.
    pub fn new(
        from_scale: f64,
        to_scale: f64,
        from_position: Point2<f64>,
        to_position: Point2<f64>,
        duration: f64,
    ) -> Self {
        Self {
            timing: Timing::new(duration),
            from_scale,
            to_scale,
            from_position,
            to_position,
        }
    }
}

/// Combined move/zoom/rotate towards a followed target.
#[derive(Debug, Clone)]
pub struct MapFollowAnimation {
    timing: Timing,
    from_position: Point2<f64>,
    to_position: Point2<f64>,
    from_scale: f64,
    to_scale: f64,
    from_angle: f64,
    to_angle: f64,
}

impl MapFollowAnimation {
    /// Creates a follow transition between two full camera states.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from_position: Point2<f64>,
        to_position: Point2<f64>,
        from_scale: f64,
        to_scale: f64,
        from_angle: f64,
        to_angle: f64,
        duration: f64,
    ) -> Self {
        Self {
            timing: Timing::new(duration),
            from_position,
            to_position,
            from_scale,
            to_scale,
            from_angle,
            to_angle,
        }
    }
}

/// Perspective tilt transition.
#[derive(Debug, Clone)]
pub struct PerspectiveAnimation {
    timing: Timing,
    from: f64,
    to: f64,
}

impl PerspectiveAnimation {
    /// Tilts the camera between the given angles over `duration` seconds.
    pub fn new(from: f64, to: f64, duration: f64) -> Self {
        Self {
            timing: Timing::new(duration),
            from,
            to,
        }
    }
}

/// Current-position arrow transition.
#[derive(Debug, Clone)]
pub struct ArrowAnimation {
    timing: Timing,
    from_position: Point2<f64>,
    to_position: Point2<f64>,
    from_angle: f64,
    to_angle: f64,
}

impl ArrowAnimation {
    /// Moves and rotates the arrow between the given states.
    pub fn new(
        from_position: Point2<f64>,
        to_position: Point2<f64>,
        from_angle: f64,
        to_angle: f64,
        duration: f64,
    ) -> Self {
        Self {
            timing: Timing::new(duration),
            from_position,
            to_position,
            from_angle,
            to_angle,
        }
    }
}

/// Deceleration of the camera after a fling gesture.
#[derive(Debug, Clone)]
pub struct KineticScrollAnimation {
    position: Point2<f64>,
    velocity: Vector2<f64>,
    friction: f64,
    min_speed: f64,
}

impl KineticScrollAnimation {
    /// Starts a deceleration at `position` with the given initial velocity
    /// (map units per second). `friction` is the exponential decay rate per
    /// second; the animation finishes once the speed drops below `min_speed`.
    pub fn new(
        position: Point2<f64>,
        velocity: Vector2<f64>,
        friction: f64,
        min_speed: f64,
    ) -> Self {
        Self {
            position,
            velocity,
            friction: friction.max(0.1),
            min_speed: min_speed.max(1e-9),
        }
    }
}

/// One camera animation. A closed set so that the dispatch below stays
/// exhaustive; adding a variant forces every consumer to handle it.
#[derive(Debug, Clone)]
pub enum Animation {
    /// Linear camera move.
    MapLinear(MapLinearAnimation),
    /// Camera zoom with an optional anchored position shift.
    MapScale(MapScaleAnimation),
    /// Combined move/zoom/rotate towards a followed target.
    MapFollow(MapFollowAnimation),
    /// Perspective tilt transition.
    Perspective(PerspectiveAnimation),
    /// Current-position arrow transition.
    Arrow(ArrowAnimation),
    /// Post-fling camera deceleration.
    KineticScroll(KineticScrollAnimation),
    /// Child animations executed one after another.
    Sequence(Vec<Animation>),
    /// Child animations executed together.
    Parallel(Vec<Animation>),
}

impl Animation {
    /// Discriminant of the variant. For composites this is the composite's
    /// own kind, not the children's.
    pub fn kind(&self) -> AnimationKind {
        match self {
            Animation::MapLinear(_) => AnimationKind::MapLinear,
            Animation::MapScale(_) => AnimationKind::MapScale,
            Animation::MapFollow(_) => AnimationKind::MapFollow,
            Animation::Perspective(_) => AnimationKind::Perspective,
            Animation::Arrow(_) => AnimationKind::Arrow,
            Animation::KineticScroll(_) => AnimationKind::KineticScroll,
            Animation::Sequence(_) => AnimationKind::Sequence,
            Animation::Parallel(_) => AnimationKind::Parallel,
        }
    }

    /// Returns true if this animation (or, for composites, any child) is of
    /// the given kind.
    pub fn matches_kind(&self, kind: AnimationKind) -> bool {
        if self.kind() == kind {
            return true;
        }
        match self {
            Animation::Sequence(children) | Animation::Parallel(children) => {
                children.iter().any(|c| c.matches_kind(kind))
            }
            _ => false,
        }
    }

    /// The (object, property) pairs this animation claims while running.
    pub fn claims(&self) -> Vec<(AnimObject, AnimProperty)> {
        use AnimObject::*;
        use AnimProperty::*;
        match self {
            Animation::MapLinear(_) => vec![(MapPlane, Position)],
            Animation::MapScale(_) => vec![(MapPlane, Scale), (MapPlane, Position)],
            Animation::MapFollow(_) => vec![
                (MapPlane, Position),
                (MapPlane, Scale),
                (MapPlane, Angle),
            ],
            Animation::Perspective(_) => vec![(MapPlane, Perspective)],
            Animation::Arrow(_) => vec![(Arrow, Position), (Arrow, Angle)],
            Animation::KineticScroll(_) => vec![(MapPlane, Position)],
            Animation::Sequence(children) | Animation::Parallel(children) => {
                let mut claims = Vec::new();
                for child in children {
                    for claim in child.claims() {
                        if !claims.contains(&claim) {
                            claims.push(claim);
                        }
                    }
                }
                claims
            }
        }
    }

    /// Whether this animation may run in the same list as another animation
    /// claiming an intersecting property set.
    pub fn is_mixable(&self) -> bool {
        match self {
            Animation::Perspective(_) | Animation::Arrow(_) => true,
            Animation::MapLinear(_)
            | Animation::MapScale(_)
            | Animation::MapFollow(_)
            | Animation::KineticScroll(_) => false,
            Animation::Sequence(children) | Animation::Parallel(children) => {
                children.iter().all(|c| c.is_mixable())
            }
        }
    }

    /// Whether a forced animation may interrupt this one.
    pub fn is_interruptible(&self) -> bool {
        match self {
            Animation::MapFollow(_) => false,
            Animation::Sequence(children) | Animation::Parallel(children) => {
                children.iter().all(|c| c.is_interruptible())
            }
            _ => true,
        }
    }

    /// Advances the animation by `dt` seconds.
    pub fn advance(&mut self, dt: f64) {
        match self {
            Animation::MapLinear(a) => a.timing.advance(dt),
            Animation::MapScale(a) => a.timing.advance(dt),
            Animation::MapFollow(a) => a.timing.advance(dt),
            Animation::Perspective(a) => a.timing.advance(dt),
            Animation::Arrow(a) => a.timing.advance(dt),
            Animation::KineticScroll(a) => {
                a.position += a.velocity * dt;
                a.velocity *= (-a.friction * dt).exp();
            }
            Animation::Sequence(children) => {
                if let Some(active) = children.iter_mut().find(|c| !c.is_finished()) {
                    active.advance(dt);
                }
            }
            Animation::Parallel(children) => {
                for child in children {
                    child.advance(dt);
                }
            }
        }
    }

    /// Returns true once the animation reached its end state.
    pub fn is_finished(&self) -> bool {
        match self {
            Animation::MapLinear(a) => a.timing.is_finished(),
            Animation::MapScale(a) => a.timing.is_finished(),
            Animation::MapFollow(a) => a.timing.is_finished(),
            Animation::Perspective(a) => a.timing.is_finished(),
            Animation::Arrow(a) => a.timing.is_finished(),
            Animation::KineticScroll(a) => a.velocity.norm() < a.min_speed,
            Animation::Sequence(children) | Animation::Parallel(children) => {
                children.iter().all(|c| c.is_finished())
            }
        }
    }

    /// Current value of the given claimed property, `None` if not claimed.
    pub fn current_value(&self, object: AnimObject, property: AnimProperty) -> Option<PropertyValue> {
        use AnimObject::*;
        use AnimProperty::*;
        match self {
            Animation::MapLinear(a) => match (object, property) {
                (MapPlane, Position) => Some(PropertyValue::Position(lerp_point(
                    a.from,
                    a.to,
                    a.timing.progress(),
                ))),
                _ => None,
            },
            Animation::MapScale(a) => {
                let t = a.timing.progress();
                match (object, property) {
                    (MapPlane, Scale) => {
                        Some(PropertyValue::Scale(lerp(a.from_scale, a.to_scale, t)))
                    }
                    (MapPlane, Position) => Some(PropertyValue::Position(lerp_point(
                        a.from_position,
                        a.to_position,
                        t,
                    ))),
                    _ => None,
                }
            }
            Animation::MapFollow(a) => {
                let t = a.timing.progress();
                match (object, property) {
                    (MapPlane, Position) => Some(PropertyValue::Position(lerp_point(
                        a.from_position,
                        a.to_position,
                        t,
                    ))),
                    (MapPlane, Scale) => {
                        Some(PropertyValue::Scale(lerp(a.from_scale, a.to_scale, t)))
                    }
                    (MapPlane, Angle) => {
                        Some(PropertyValue::Angle(lerp(a.from_angle, a.to_angle, t)))
                    }
                    _ => None,
                }
            }
            Animation::Perspective(a) => match (object, property) {
                (MapPlane, Perspective) => Some(PropertyValue::Perspective(lerp(
                    a.from,
                    a.to,
                    a.timing.progress(),
                ))),
                _ => None,
            },
            Animation::Arrow(a) => {
                let t = a.timing.progress();
                match (object, property) {
                    (Arrow, Position) => Some(PropertyValue::Position(lerp_point(
                        a.from_position,
                        a.to_position,
                        t,
                    ))),
                    (Arrow, Angle) => {
                        Some(PropertyValue::Angle(lerp(a.from_angle, a.to_angle, t)))
                    }
                    _ => None,
                }
            }
            Animation::KineticScroll(a) => match (object, property) {
                (MapPlane, Position) => Some(PropertyValue::Position(a.position)),
                _ => None,
            },
            Animation::Sequence(children) => children
                .iter()
                .find(|c| !c.is_finished())
                .or_else(|| children.last())
                .and_then(|c| c.current_value(object, property)),
            Animation::Parallel(children) => children
                .iter()
                .filter_map(|c| c.current_value(object, property))
                .last(),
        }
    }

    /// End value of the given claimed property, `None` if not claimed. For a
    /// kinetic scroll the end state is wherever the deceleration currently
    /// is.
    pub fn target_value(&self, object: AnimObject, property: AnimProperty) -> Option<PropertyValue> {
        use AnimObject::*;
        use AnimProperty::*;
        match self {
            Animation::MapLinear(a) => match (object, property) {
                (MapPlane, Position) => Some(PropertyValue::Position(a.to)),
                _ => None,
            },
            Animation::MapScale(a) => match (object, property) {
                (MapPlane, Scale) => Some(PropertyValue::Scale(a.to_scale)),
                (MapPlane, Position) => Some(PropertyValue::Position(a.to_position)),
                _ => None,
            },
            Animation::MapFollow(a) => match (object, property) {
                (MapPlane, Position) => Some(PropertyValue::Position(a.to_position)),
                (MapPlane, Scale) => Some(PropertyValue::Scale(a.to_scale)),
                (MapPlane, Angle) => Some(PropertyValue::Angle(a.to_angle)),
                _ => None,
            },
            Animation::Perspective(a) => match (object, property) {
                (MapPlane, Perspective) => Some(PropertyValue::Perspective(a.to)),
                _ => None,
            },
            Animation::Arrow(a) => match (object, property) {
                (Arrow, Position) => Some(PropertyValue::Position(a.to_position)),
                (Arrow, Angle) => Some(PropertyValue::Angle(a.to_angle)),
                _ => None,
            },
            Animation::KineticScroll(_) => self.current_value(object, property),
            Animation::Sequence(children) => children
                .iter()
                .rev()
                .find_map(|c| c.target_value(object, property)),
            Animation::Parallel(children) => children
                .iter()
                .rev()
                .find_map(|c| c.target_value(object, property)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use assert_matches::assert_matches;

    #[test]
    fn linear_animation_interpolates_position() {
        let mut anim = Animation::MapLinear(MapLinearAnimation::new(
            Point2::new(0.0, 0.0),
            Point2::new(100.0, 0.0),
            1.0,
        ));

        anim.advance(0.5);
        let value = anim.current_value(AnimObject::MapPlane, AnimProperty::Position);
        assert_matches!(value, Some(PropertyValue::Position(p)) if p.x == 50.0);
        assert!(!anim.is_finished());

        anim.advance(0.6);
        assert!(anim.is_finished());
        assert_matches!(
            anim.target_value(AnimObject::MapPlane, AnimProperty::Position),
            Some(PropertyValue::Position(p)) if p.x == 100.0
        );
    }

    #[test]
    fn kinetic_scroll_decays_to_a_stop() {
        let mut anim = Animation::KineticScroll(KineticScrollAnimation::new(
            Point2::new(0.0, 0.0),
            Vector2::new(100.0, 0.0),
            4.0,
            1.0,
        ));

        let mut total = 0.0;
        while !anim.is_finished() && total < 10.0 {
            anim.advance(1.0 / 60.0);
            total += 1.0 / 60.0;
        }

        assert!(anim.is_finished(), "kinetic scroll never stopped");
        let end = anim.current_value(AnimObject::MapPlane, AnimProperty::Position);
        assert_matches!(end, Some(PropertyValue::Position(p)) if p.x > 0.0 && p.x < 100.0);
    }

    #[test]
    fn sequence_runs_children_in_order() {
        let mut anim = Animation::Sequence(vec![
            Animation::MapLinear(MapLinearAnimation::new(
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
                1.0,
            )),
            Animation::MapLinear(MapLinearAnimation::new(
                Point2::new(10.0, 0.0),
                Point2::new(20.0, 0.0),
                1.0,
            )),
        ]);

        anim.advance(1.0);
        assert!(!anim.is_finished());
        let mid = anim.current_value(AnimObject::MapPlane, AnimProperty::Position);
        assert_matches!(mid, Some(PropertyValue::Position(p)) if p.x == 10.0);

        anim.advance(1.0);
        assert!(anim.is_finished());
    }

    #[test]
    fn claims_of_composites_are_the_union_of_children() {
        let anim = Animation::Parallel(vec![
            Animation::MapLinear(MapLinearAnimation::new(
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                1.0,
            )),
            Animation::Perspective(PerspectiveAnimation::new(0.0, 0.5, 1.0)),
        ]);

        let claims = anim.claims();
        assert!(claims.contains(&(AnimObject::MapPlane, AnimProperty::Position)));
        assert!(claims.contains(&(AnimObject::MapPlane, AnimProperty::Perspective)));
        assert_eq!(claims.len(), 2);
    }

    #[test]
    fn smoothstep_easing_is_monotonic() {
        let anim = |elapsed: f64| {
            let mut a = Animation::Perspective(PerspectiveAnimation::new(0.0, 1.0, 1.0));
            a.advance(elapsed);
            match a.current_value(AnimObject::MapPlane, AnimProperty::Perspective) {
                Some(PropertyValue::Perspective(v)) => v,
                other => panic!("unexpected value {other:?}"),
            }
        };

        let mut last = 0.0;
        for step in 1..=10 {
            let value = anim(step as f64 / 10.0);
            assert!(value >= last, "easing regressed at step {step}");
            last = value;
        }
        assert_abs_diff_eq!(last, 1.0);
    }
}
