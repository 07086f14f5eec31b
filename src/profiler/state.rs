//! Dump/GC coordination state machine.
//!
//! `Stopped -> Running` when a drain starts, back to `Stopped` when it
//! ends. A GC pause raises the waiting flag; a running drain notices it at
//! its next poll point, parks the machine in `GcWaiting` and returns, and
//! the GC's resume hands the cycle back as `Running`.

use parking_lot::{Condvar, Mutex};

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DumpState {
    Stopped = 0,
    Running = 1,
    Saving = 2,
    GcWaiting = 3,
}

impl DumpState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Saving,
            3 => Self::GcWaiting,
            _ => Self::Stopped,
        }
    }

    fn is_busy(self) -> bool {
        matches!(self, Self::Running | Self::Saving)
    }
}

#[derive(Debug, Default)]
pub struct PgoState {
    state: AtomicU8,
    gc_waiting: AtomicBool,
    lock: Mutex<()>,
    changed: Condvar,
}

impl PgoState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DumpState {
        DumpState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: DumpState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Polled from scan loops; relaxed on purpose.
    pub fn gc_is_waiting(&self) -> bool {
        self.gc_waiting.load(Ordering::Relaxed)
    }

    /// Claims the drain. Fails while another drain runs or a GC is pending.
    pub fn set_start_if_stop(&self) -> bool {
        let _guard = self.lock.lock();
        if self.gc_is_waiting() || self.state() != DumpState::Stopped {
            return false;
        }
        self.set(DumpState::Running);
        true
    }

    pub fn set_stop_and_notify(&self) {
        let _guard = self.lock.lock();
        self.set(DumpState::Stopped);
        self.changed.notify_all();
    }

    pub fn set_save_and_notify(&self) {
        let _guard = self.lock.lock();
        self.set(DumpState::Saving);
        self.changed.notify_all();
    }

    /// Leaves `Saving` once the file is written.
    pub fn finish_save(&self) {
        let _guard = self.lock.lock();
        if self.state() == DumpState::Saving {
            self.set(DumpState::Running);
        }
        self.changed.notify_all();
    }

    /// Called by a drain that saw the GC flag: parks the cycle.
    pub fn pause_for_gc(&self) {
        let _guard = self.lock.lock();
        if self.state().is_busy() {
            self.set(DumpState::GcWaiting);
        }
        self.changed.notify_all();
    }

    /// Raises the GC flag and blocks until no drain touches the heap.
    pub fn suspend_by_gc(&self) {
        let mut guard = self.lock.lock();
        self.gc_waiting.store(true, Ordering::Relaxed);
        while self.state().is_busy() {
            self.changed.wait(&mut guard);
        }
    }

    /// Clears the GC flag. Returns `true` when a drain was parked and now
    /// owns the machine again as `Running`.
    pub fn resume_by_gc(&self) -> bool {
        let _guard = self.lock.lock();
        self.gc_waiting.store(false, Ordering::Relaxed);
        if self.state() == DumpState::GcWaiting {
            self.set(DumpState::Running);
            return true;
        }
        false
    }

    /// Waits for any in-flight drain to finish, then claims the machine for
    /// a final synchronous drain.
    pub fn start_dump_before_destroy(&self) {
        let mut guard = self.lock.lock();
        while self.state().is_busy() {
            self.changed.wait(&mut guard);
        }
        self.set(DumpState::Running);
    }

    pub fn wait_until_stopped(&self) {
        let mut guard = self.lock.lock();
        while self.state().is_busy() {
            self.changed.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn only_one_drain_at_a_time() {
        let state = PgoState::new();
        assert!(state.set_start_if_stop());
        assert!(!state.set_start_if_stop());
        state.set_stop_and_notify();
        assert!(state.set_start_if_stop());
    }

    #[test]
    fn gc_flag_blocks_new_drains() {
        let state = PgoState::new();
        state.suspend_by_gc();
        assert!(state.gc_is_waiting());
        assert!(!state.set_start_if_stop());
        assert!(!state.resume_by_gc());
        assert!(state.set_start_if_stop());
    }

    #[test]
    fn save_round_trips_to_running() {
        let state = PgoState::new();
        assert!(state.set_start_if_stop());
        state.set_save_and_notify();
        assert_eq!(state.state(), DumpState::Saving);
        state.finish_save();
        assert_eq!(state.state(), DumpState::Running);
    }

    #[test]
    fn suspend_waits_for_running_drain_to_park() {
        let state = Arc::new(PgoState::new());
        assert!(state.set_start_if_stop());

        let drain = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                while !state.gc_is_waiting() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                state.pause_for_gc();
            })
        };

        state.suspend_by_gc();
        assert_eq!(state.state(), DumpState::GcWaiting);
        drain.join().expect("drain thread");
        assert!(state.resume_by_gc());
        assert_eq!(state.state(), DumpState::Running);
    }
}
