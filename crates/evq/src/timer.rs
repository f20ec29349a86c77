//! Software timers on a tick-driven delta list.
//!
//! Timers live in an arena of slots addressed by generation-checked handles.
//! Pending expiries form an ordered list in which every entry stores only the
//! tick *delta* to its predecessor, so advancing time is a single decrement
//! of the head entry. The absolute expiry of any entry is the prefix sum of
//! deltas from the head.

use crate::engine::Engine;
use crate::error::Error;

/// Callback invoked when a timer expires. Dispatch happens through the
/// deferred-call queue, never synchronously from `tick`.
pub type TimerFn = dyn FnMut(&mut Engine);

/// Handle to a timer slot. Stale handles (freed slots, or slots since
/// reused) are detected by the generation counter and treated as no-ops
/// or reported as [`Error::StaleTimer`], depending on the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    index: usize,
    gen: u32,
}

struct TimerSlot {
    initial_ms: u32,
    repeat_ms: Option<u32>,
    running: bool,
    callback: Option<Box<TimerFn>>,
}

struct DeltaEntry {
    index: usize,
    delta: u32,
}

pub(crate) struct TimerList {
    tick_ms: u32,
    slots: Vec<Option<TimerSlot>>,
    gens: Vec<u32>,
    free: Vec<usize>,
    /// Pending expiries ordered by absolute expiry; `delta` is relative to
    /// the previous entry. End of the vec marks "no timer beyond here".
    order: Vec<DeltaEntry>,
}

impl TimerList {
    pub(crate) fn new(tick_ms: u32) -> Self {
        Self {
            tick_ms,
            slots: Vec::new(),
            gens: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
        }
    }

    pub(crate) fn init(
        &mut self,
        initial_ms: u32,
        repeat_ms: Option<u32>,
        callback: Box<TimerFn>,
    ) -> TimerHandle {
        let slot = TimerSlot {
            initial_ms,
            repeat_ms,
            running: false,
            callback: Some(callback),
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.gens.push(0);
                self.slots.len() - 1
            }
        };
        TimerHandle {
            index,
            gen: self.gens[index],
        }
    }

    pub(crate) fn free(&mut self, handle: TimerHandle) {
        if self.slot(handle).is_none() {
            return;
        }
        self.unlink(handle.index);
        self.slots[handle.index] = None;
        self.gens[handle.index] = self.gens[handle.index].wrapping_add(1);
        self.free.push(handle.index);
    }

    /// (Re)arms the timer. Always stops it first, then links it at
    /// `ceil(initial_ms / tick_ms)` ticks (at least one), plus one extra
    /// guard tick so a timer armed just before a tick boundary cannot fire
    /// on that same tick.
    pub(crate) fn start(&mut self, handle: TimerHandle) -> Result<(), Error> {
        let initial_ms = {
            let slot = self.slot_mut(handle).ok_or(Error::StaleTimer)?;
            slot.running = true;
            slot.initial_ms
        };
        self.unlink(handle.index);
        let delta = self.ticks_for(initial_ms).saturating_add(1);
        self.link(handle.index, delta);
        Ok(())
    }

    /// Unlinks the timer. Idempotent; a stale handle is a no-op.
    pub(crate) fn stop(&mut self, handle: TimerHandle) {
        match self.slot_mut(handle) {
            Some(slot) => slot.running = false,
            None => {
                log::debug!("stop on stale timer {handle:?}");
                return;
            }
        }
        self.unlink(handle.index);
    }

    pub(crate) fn is_stopped(&self, handle: TimerHandle) -> bool {
        self.slot(handle).map_or(true, |slot| !slot.running)
    }

    pub(crate) fn set_initial(&mut self, handle: TimerHandle, ms: u32) -> Result<(), Error> {
        self.slot_mut(handle)
            .map(|slot| slot.initial_ms = ms)
            .ok_or(Error::StaleTimer)
    }

    pub(crate) fn initial(&self, handle: TimerHandle) -> Option<u32> {
        self.slot(handle).map(|slot| slot.initial_ms)
    }

    /// Changing the repeat interval never reschedules a pending expiry; it
    /// takes effect at the next re-arm.
    pub(crate) fn set_repeat(&mut self, handle: TimerHandle, ms: Option<u32>) -> Result<(), Error> {
        self.slot_mut(handle)
            .map(|slot| slot.repeat_ms = ms)
            .ok_or(Error::StaleTimer)
    }

    pub(crate) fn repeat(&self, handle: TimerHandle) -> Option<Option<u32>> {
        self.slot(handle).map(|slot| slot.repeat_ms)
    }

    /// Advances time by one tick and returns every timer that expired, in
    /// expiry order. Periodic timers are relinked with their repeat
    /// interval before this returns.
    pub(crate) fn advance(&mut self) -> Vec<TimerHandle> {
        let mut fired = Vec::new();
        match self.order.first_mut() {
            Some(head) => head.delta = head.delta.saturating_sub(1),
            None => return fired,
        }
        while self.order.first().is_some_and(|entry| entry.delta == 0) {
            let entry = self.order.remove(0);
            let index = entry.index;
            let repeat_ms = match self.slots[index].as_mut() {
                Some(slot) => {
                    slot.running = slot.repeat_ms.is_some();
                    slot.repeat_ms
                }
                None => continue,
            };
            if let Some(ms) = repeat_ms {
                let delta = self.ticks_for(ms);
                self.link(index, delta);
            }
            fired.push(TimerHandle {
                index,
                gen: self.gens[index],
            });
        }
        fired
    }

    pub(crate) fn take_callback(&mut self, handle: TimerHandle) -> Option<Box<TimerFn>> {
        self.slot_mut(handle).and_then(|slot| slot.callback.take())
    }

    pub(crate) fn restore_callback(&mut self, handle: TimerHandle, callback: Box<TimerFn>) {
        if let Some(slot) = self.slot_mut(handle) {
            if slot.callback.is_none() {
                slot.callback = Some(callback);
            }
        }
        // A slot freed during its own callback simply drops the closure.
    }

    /// Absolute remaining ticks until expiry: the prefix sum of deltas from
    /// the list head down to this timer's entry.
    pub(crate) fn remaining_ticks(&self, handle: TimerHandle) -> Option<u32> {
        self.slot(handle)?;
        let mut sum: u32 = 0;
        for entry in &self.order {
            sum = sum.saturating_add(entry.delta);
            if entry.index == handle.index {
                return Some(sum);
            }
        }
        None
    }

    fn ticks_for(&self, ms: u32) -> u32 {
        let tick = u64::from(self.tick_ms.max(1));
        let ticks = (u64::from(ms) + tick - 1) / tick;
        ticks.clamp(1, u64::from(u32::MAX)) as u32
    }

    /// Inserts at the position where the running delta sum first exceeds the
    /// requested delta, walking past equal-or-smaller deltas so ties keep
    /// insertion order. The successor keeps its absolute expiry by giving up
    /// the inserted delta.
    fn link(&mut self, index: usize, mut delta: u32) {
        let mut pos = 0;
        while let Some(entry) = self.order.get(pos) {
            if delta < entry.delta {
                break;
            }
            delta -= entry.delta;
            pos += 1;
        }
        self.order.insert(pos, DeltaEntry { index, delta });
        if let Some(next) = self.order.get_mut(pos + 1) {
            next.delta -= delta;
        }
    }

    /// Splices the entry out, handing its remaining delta to the successor
    /// so everything behind it keeps its absolute expiry.
    fn unlink(&mut self, index: usize) {
        if let Some(pos) = self.order.iter().position(|entry| entry.index == index) {
            let delta = self.order.remove(pos).delta;
            if let Some(next) = self.order.get_mut(pos) {
                next.delta = next.delta.saturating_add(delta);
            }
        }
    }

    fn slot(&self, handle: TimerHandle) -> Option<&TimerSlot> {
        if self.gens.get(handle.index).copied() != Some(handle.gen) {
            return None;
        }
        self.slots[handle.index].as_ref()
    }

    fn slot_mut(&mut self, handle: TimerHandle) -> Option<&mut TimerSlot> {
        if self.gens.get(handle.index).copied() != Some(handle.gen) {
            return None;
        }
        self.slots[handle.index].as_mut()
    }
}
