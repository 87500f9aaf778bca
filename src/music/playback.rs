//! Loop counter shared by every backend's playback state machine.
//!
//! A player is *Stopped* while its counter is 0 and *Playing* otherwise.
//! `-1` (or any negative count) loops forever, `n > 0` is the number of
//! passes still to play, the current one included.

/// What to do when a decode pass runs out of data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassEnd {
    /// The last pass finished; the player is now stopped
    Finished,
    /// Rewind and play again with this loop count
    Rewind(i32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackState {
    play_count: i32,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the loop counter (the `Play(n)` transition).
    pub fn start(&mut self, loops: i32) {
        self.play_count = loops;
    }

    /// Force the stopped state.
    pub fn stop(&mut self) {
        self.play_count = 0;
    }

    pub fn is_playing(&self) -> bool {
        self.play_count != 0
    }

    pub fn is_infinite(&self) -> bool {
        self.play_count < 0
    }

    /// Remaining passes; negative means infinite
    pub fn remaining(&self) -> i32 {
        self.play_count
    }

    /// Account for the end of the current pass.
    ///
    /// On `Rewind` the counter is left alone; the caller sets it once the
    /// rewind has succeeded.
    pub fn end_of_pass(&mut self) -> PassEnd {
        match self.play_count {
            0 | 1 => {
                self.play_count = 0;
                PassEnd::Finished
            }
            n if n > 0 => PassEnd::Rewind(n - 1),
            n => PassEnd::Rewind(n),
        }
    }
}
