//! Camera animation state machine.
//!
//! Running animations form a FIFO chain of lists; all animations of the front
//! list advance in parallel, the lists behind wait for the front to finish.
//! Finished animations leave their final property values in a cache so that
//! late queries (for example the next frame's view resolution) still observe
//! a deterministic end state.

use std::collections::{HashMap, VecDeque};

mod kinds;

pub use kinds::{
    AnimObject, AnimProperty, Animation, AnimationKind, ArrowAnimation, KineticScrollAnimation,
    MapFollowAnimation, MapLinearAnimation, MapScaleAnimation, PerspectiveAnimation, PropertyValue,
};

/// Notification about an animation lifecycle transition. Drained by the owner
/// of the system once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationEvent {
    /// The animation entered the running (front) list.
    Started(AnimationKind),
    /// The animation reached its end state and was removed.
    Finished(AnimationKind),
    /// The animation was displaced by a forced conflicting animation.
    Interrupted(AnimationKind),
}

/// The set of currently-running and queued animations, owned by the render
/// thread.
#[derive(Default)]
pub struct AnimationSystem {
    chain: VecDeque<Vec<Animation>>,
    cache: HashMap<(AnimObject, AnimProperty), PropertyValue, ahash::RandomState>,
    events: Vec<AnimationEvent>,
}

impl AnimationSystem {
    /// Creates an empty system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to start an animation.
    ///
    /// If the incoming animation's claimed properties intersect a running
    /// non-mixable animation, the new one is rejected unless `force` is set,
    /// in which case the conflicting animations are interrupted. A
    /// non-mixable animation conflicting only with mixable ones is queued
    /// into a new list and starts once the current list finishes.
    ///
    /// Returns whether the animation was accepted.
    pub fn add_animation(&mut self, animation: Animation, force: bool) -> bool {
        let claims = animation.claims();

        let Some(front) = self.chain.front_mut() else {
            self.events.push(AnimationEvent::Started(animation.kind()));
            self.chain.push_back(vec![animation]);
            return true;
        };

        let conflicting: Vec<usize> = front
            .iter()
            .enumerate()
            .filter(|(_, running)| {
                running
                    .claims()
                    .iter()
                    .any(|claim| claims.contains(claim))
            })
            .map(|(index, _)| index)
            .collect();

        if conflicting.is_empty()
            || (animation.is_mixable() && conflicting.iter().all(|i| front[*i].is_mixable()))
        {
            self.events.push(AnimationEvent::Started(animation.kind()));
            front.push(animation);
            return true;
        }

        if conflicting.iter().all(|i| front[*i].is_mixable()) {
            // The running conflicts can be blended, the incoming animation
            // cannot: run it after the current list.
            self.chain.push_back(vec![animation]);
            return true;
        }

        if !force {
            log::debug!(
                "rejected {:?} animation conflicting with a running one",
                animation.kind()
            );
            return false;
        }

        if conflicting.iter().any(|i| !front[*i].is_interruptible()) {
            log::warn!(
                "forced {:?} animation cannot interrupt a non-interruptible one",
                animation.kind()
            );
            return false;
        }

        for index in conflicting.into_iter().rev() {
            let interrupted = front.remove(index);
            self.events
                .push(AnimationEvent::Interrupted(interrupted.kind()));
        }
        self.events.push(AnimationEvent::Started(animation.kind()));
        front.push(animation);
        true
    }

    /// Advances the front list by `dt` seconds, retiring finished animations
    /// and starting the next list when the front one empties.
    pub fn advance(&mut self, dt: f64) {
        let mut finished = Vec::new();
        {
            let Some(front) = self.chain.front_mut() else {
                return;
            };

            for animation in front.iter_mut() {
                animation.advance(dt);
            }

            let mut index = 0;
            while index < front.len() {
                if front[index].is_finished() {
                    finished.push(front.remove(index));
                } else {
                    index += 1;
                }
            }
        }

        for animation in finished {
            self.retire(animation, true);
        }

        while self.chain.front().is_some_and(|list| list.is_empty()) {
            self.chain.pop_front();
            if let Some(next) = self.chain.front() {
                for animation in next {
                    self.events.push(AnimationEvent::Started(animation.kind()));
                }
            }
        }
    }

    /// Force-completes every animation of the given kind, in all lists.
    /// With `rewind` set the animations jump to their end values, otherwise
    /// they stop at their current values. Either way the resulting values are
    /// cached.
    pub fn finish_animations(&mut self, kind: AnimationKind, rewind: bool) {
        let mut retired = Vec::new();
        for list in self.chain.iter_mut() {
            let mut index = 0;
            while index < list.len() {
                if list[index].matches_kind(kind) {
                    retired.push(list.remove(index));
                } else {
                    index += 1;
                }
            }
        }

        for animation in retired {
            self.retire(animation, rewind);
        }

        while self.chain.front().is_some_and(|list| list.is_empty()) {
            self.chain.pop_front();
            if let Some(next) = self.chain.front() {
                for animation in next {
                    self.events.push(AnimationEvent::Started(animation.kind()));
                }
            }
        }
        self.chain.retain(|list| !list.is_empty());
    }

    /// Current value of the property: the running animation's value when one
    /// claims it, otherwise the cached final value of the last animation that
    /// did.
    pub fn get_property(
        &self,
        object: AnimObject,
        property: AnimProperty,
    ) -> Option<PropertyValue> {
        if let Some(front) = self.chain.front() {
            if let Some(value) = front
                .iter()
                .rev()
                .find_map(|a| a.current_value(object, property))
            {
                return Some(value);
            }
        }

        self.cache.get(&(object, property)).copied()
    }

    /// Returns true while any animation is running or queued.
    pub fn has_animations(&self) -> bool {
        !self.chain.is_empty()
    }

    /// Number of lists in the chain. The front list is the running one.
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Drains the lifecycle events accumulated since the last call.
    pub fn take_events(&mut self) -> Vec<AnimationEvent> {
        std::mem::take(&mut self.events)
    }

    fn retire(&mut self, animation: Animation, rewind: bool) {
        for (object, property) in animation.claims() {
            let value = if rewind {
                animation.target_value(object, property)
            } else {
                animation.current_value(object, property)
            };
            if let Some(value) = value {
                self.cache.insert((object, property), value);
            }
        }
        self.events.push(AnimationEvent::Finished(animation.kind()));
    }
}
