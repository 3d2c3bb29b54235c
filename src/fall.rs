//! Edge-triggered fall detection.
//!
//! `detect_fall` is a stateless transition check. `FallStateMachine` holds the
//! one-slot previous observation the loop threads through it.

use crate::posture::PersonState;

/// Returns true only on a standing -> lying transition.
///
/// No prior observation, lying -> lying, lying -> standing and
/// standing -> standing all return false.
pub fn detect_fall(prev: Option<&PersonState>, curr: &PersonState) -> bool {
    match prev {
        Some(prev) => !prev.is_lying() && curr.is_lying(),
        None => false,
    }
}

/// What to do with the retained observation when frames have no person.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MissPolicy {
    /// Keep the last observation until detection resumes.
    #[default]
    Freeze,
    /// Drop the last observation after this many consecutive misses.
    ResetAfter(u32),
}

/// Result of feeding one frame's observation to the state machine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    pub previous: Option<PersonState>,
    pub current: PersonState,
    pub fall_detected: bool,
}

impl Transition {
    pub fn posture_changed(&self) -> bool {
        self.previous
            .is_some_and(|prev| prev.is_lying() != self.current.is_lying())
    }
}

/// Owns the previous-frame slot for `detect_fall`.
#[derive(Debug, Default)]
pub struct FallStateMachine {
    prev: Option<PersonState>,
    miss_policy: MissPolicy,
    consecutive_misses: u32,
}

impl FallStateMachine {
    pub fn new(miss_policy: MissPolicy) -> Self {
        Self {
            prev: None,
            miss_policy,
            consecutive_misses: 0,
        }
    }

    pub fn previous(&self) -> Option<&PersonState> {
        self.prev.as_ref()
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    /// Feed a frame in which a person was selected. Always overwrites the slot.
    pub fn observe(&mut self, curr: PersonState) -> Transition {
        let fall_detected = detect_fall(self.prev.as_ref(), &curr);
        let previous = self.prev.replace(curr);
        self.consecutive_misses = 0;
        Transition {
            previous,
            current: curr,
            fall_detected,
        }
    }

    /// Feed a frame with no person. Leaves the slot untouched unless the
    /// miss policy says otherwise.
    pub fn observe_miss(&mut self) {
        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        if let MissPolicy::ResetAfter(limit) = self.miss_policy {
            if self.prev.is_some() && self.consecutive_misses >= limit.max(1) {
                log::debug!(
                    "clearing retained posture after {} missed frames",
                    self.consecutive_misses
                );
                self.prev = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posture::BoundingBox;

    fn standing() -> PersonState {
        PersonState::classify(BoundingBox::new(0, 0, 50, 100), 1.3)
    }

    fn lying() -> PersonState {
        PersonState::classify(BoundingBox::new(0, 0, 100, 50), 1.3)
    }

    #[test]
    fn no_prior_observation_never_falls() {
        assert!(!detect_fall(None, &standing()));
        assert!(!detect_fall(None, &lying()));
    }

    #[test]
    fn transition_truth_table() {
        assert!(detect_fall(Some(&standing()), &lying()));
        assert!(!detect_fall(Some(&lying()), &lying()));
        assert!(!detect_fall(Some(&lying()), &standing()));
        assert!(!detect_fall(Some(&standing()), &standing()));
    }

    #[test]
    fn sustained_lying_triggers_once() {
        let mut sm = FallStateMachine::default();
        let fired: Vec<bool> = [standing(), lying(), lying(), lying()]
            .into_iter()
            .map(|s| sm.observe(s).fall_detected)
            .collect();
        assert_eq!(fired, vec![false, true, false, false]);
    }

    #[test]
    fn standing_up_rearms_detection() {
        let mut sm = FallStateMachine::default();
        let seq = [standing(), lying(), standing(), lying()];
        let count = seq
            .into_iter()
            .filter(|s| sm.observe(*s).fall_detected)
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn missed_frames_freeze_previous_state() {
        let mut sm = FallStateMachine::new(MissPolicy::Freeze);
        sm.observe(standing());
        for _ in 0..50 {
            sm.observe_miss();
        }
        assert_eq!(sm.consecutive_misses(), 50);
        assert!(sm.previous().is_some());
        assert!(sm.observe(lying()).fall_detected);
        assert_eq!(sm.consecutive_misses(), 0);
    }

    #[test]
    fn reset_policy_clears_after_limit() {
        let mut sm = FallStateMachine::new(MissPolicy::ResetAfter(3));
        sm.observe(standing());
        sm.observe_miss();
        sm.observe_miss();
        assert!(sm.previous().is_some());
        sm.observe_miss();
        assert!(sm.previous().is_none());
        assert!(!sm.observe(lying()).fall_detected);
    }

    #[test]
    fn posture_change_is_reported() {
        let mut sm = FallStateMachine::default();
        assert!(!sm.observe(standing()).posture_changed());
        assert!(sm.observe(lying()).posture_changed());
        assert!(!sm.observe(lying()).posture_changed());
    }
}
