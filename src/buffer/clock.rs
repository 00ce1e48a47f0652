use crate::buffer::replacer::Replacer;
use crate::buffer::{AccessType, FrameId};

use log::debug;

#[derive(Clone, Copy, PartialEq, Eq)]
enum ClockState {
    /// Not a candidate (pinned or untracked).
    Out,
    /// Candidate, will be taken on the next sweep.
    Ready,
    /// Candidate with a second chance left.
    Referenced,
}

/// Second-chance clock replacement, the simpler alternative to LRU-K.
///
/// Evictable frames sit on a ring; the hand sweeps over them, demoting
/// referenced frames once and taking the first ready frame it meets.
pub struct ClockReplacer {
    state: Vec<ClockState>,
    hand: usize,
    evictable: usize,
}

impl ClockReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            state: vec![ClockState::Out; num_frames],
            hand: 0,
            evictable: 0,
        }
    }

    fn advance_hand(&mut self) {
        self.hand = (self.hand + 1) % self.state.len();
    }
}

impl Replacer for ClockReplacer {
    fn record_access(&mut self, frame_id: FrameId, _access: AccessType) {
        if self.state[frame_id] == ClockState::Ready {
            self.state[frame_id] = ClockState::Referenced;
        }
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        match (self.state[frame_id], evictable) {
            (ClockState::Out, true) => {
                self.state[frame_id] = ClockState::Referenced;
                self.evictable += 1;
            }
            (ClockState::Ready | ClockState::Referenced, false) => {
                self.state[frame_id] = ClockState::Out;
                self.evictable -= 1;
            }
            _ => {}
        }
    }

    fn evict(&mut self) -> Option<FrameId> {
        if self.evictable == 0 {
            return None;
        }
        while self.state[self.hand] != ClockState::Ready {
            if self.state[self.hand] == ClockState::Referenced {
                self.state[self.hand] = ClockState::Ready;
            }
            self.advance_hand();
        }
        let victim = self.hand;
        self.state[victim] = ClockState::Out;
        self.evictable -= 1;
        self.advance_hand();
        debug!("clock evicts frame {victim}");
        Some(victim)
    }

    fn remove(&mut self, frame_id: FrameId) {
        if self.state[frame_id] != ClockState::Out {
            self.state[frame_id] = ClockState::Out;
            self.evictable -= 1;
        }
    }

    fn size(&self) -> usize {
        self.evictable
    }
}
