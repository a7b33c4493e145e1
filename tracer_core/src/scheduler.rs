//! Periodic callback slots multiplexed onto one free-running counter.
//!
//! Each armed slot owns one handler and one deadline. Servicing a due slot
//! rearms it at `now + interval` (read from the live counter, not from the
//! previous deadline) before the handler runs, so a handler that overruns its
//! interval stretches that slot's period instead of queueing a second firing.
//! Overrun is not an error; `SlotStats` records it so the drift is visible.
//!
//! Handlers receive the context object (`&mut Ctx`) explicitly; nothing is
//! shared through globals. `SchedulerThread` moves the scheduler and its
//! context onto a background thread for wall-clock execution.
use crate::error::{Result, TracerError};
use crossbeam_channel as xch;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracer_traits::Clock;

/// Alarm comparators available on the counter.
pub const SLOT_COUNT: usize = 4;

/// Sleep used by `idle` when no slot is armed.
const IDLE_POLL: Duration = Duration::from_micros(100);
/// Upper bound on one background-thread sleep so newly armed slots are seen.
const THREAD_MAX_IDLE: Duration = Duration::from_millis(1);

pub type SlotHandler<Ctx> = Box<dyn FnMut(&mut Ctx) + Send>;

/// Firing statistics of one slot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SlotStats {
    pub fired: u64,
    /// Firings that started half an interval or more past their deadline.
    pub late: u64,
    pub max_late_us: u64,
    /// Spacing between the two most recent firings.
    pub last_period_us: u64,
}

struct Slot<Ctx> {
    interval: Duration,
    deadline: Instant,
    last_fire: Option<Instant>,
    handler: SlotHandler<Ctx>,
    stats: SlotStats,
}

pub struct Scheduler<Ctx> {
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    slots: [Option<Slot<Ctx>>; SLOT_COUNT],
    retired: [Option<SlotStats>; SLOT_COUNT],
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

impl<Ctx> Scheduler<Ctx> {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let epoch = clock.now();
        Self {
            clock,
            epoch,
            slots: std::array::from_fn(|_| None),
            retired: [None; SLOT_COUNT],
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }

    /// Counter time since the scheduler was created.
    pub fn now_us(&self) -> u64 {
        self.clock.us_since(self.epoch)
    }

    /// Arm `slot` to run `handler` every `interval_us`, first at
    /// `now + interval_us`. Re-arming an armed slot replaces its handler.
    pub fn start(
        &mut self,
        slot: usize,
        interval_us: u32,
        handler: impl FnMut(&mut Ctx) + Send + 'static,
    ) -> Result<()> {
        if slot >= SLOT_COUNT {
            return Err(TracerError::Config(format!(
                "timer slot {slot} out of range (0..{SLOT_COUNT})"
            ))
            .into());
        }
        if interval_us == 0 {
            return Err(TracerError::Config(format!("timer slot {slot} interval must be > 0")).into());
        }
        let interval = Duration::from_micros(u64::from(interval_us));
        self.slots[slot] = Some(Slot {
            interval,
            deadline: self.clock.now() + interval,
            last_fire: None,
            handler: Box::new(handler),
            stats: SlotStats::default(),
        });
        tracing::debug!(slot, interval_us, "timer slot armed");
        Ok(())
    }

    /// Disarm `slot`. The handler is dropped here; it cannot run again.
    pub fn stop(&mut self, slot: usize) -> Result<()> {
        let Some(entry) = self.slots.get_mut(slot) else {
            return Err(TracerError::Config(format!(
                "timer slot {slot} out of range (0..{SLOT_COUNT})"
            ))
            .into());
        };
        if let Some(s) = entry.take() {
            tracing::debug!(slot, fired = s.stats.fired, late = s.stats.late, "timer slot stopped");
            self.retired[slot] = Some(s.stats);
        }
        Ok(())
    }

    pub fn is_armed(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(Option::is_some)
    }

    /// Statistics of the armed handler, or of the last one stopped on `slot`.
    pub fn stats(&self, slot: usize) -> Option<SlotStats> {
        match self.slots.get(slot)? {
            Some(s) => Some(s.stats),
            None => self.retired[slot],
        }
    }

    /// Run every due slot once, in slot order. Returns how many fired.
    pub fn service(&mut self, ctx: &mut Ctx) -> usize {
        let clock = &self.clock;
        let mut fired = 0;
        for slot in self.slots.iter_mut().flatten() {
            let now = clock.now();
            if now < slot.deadline {
                continue;
            }
            // Rearm from the live counter first; the handler's own run time
            // then never shortens the next period.
            let late = now.saturating_duration_since(slot.deadline);
            slot.deadline = now + slot.interval;

            let st = &mut slot.stats;
            st.fired += 1;
            st.max_late_us = st.max_late_us.max(micros(late));
            if late >= slot.interval / 2 {
                st.late += 1;
            }
            if let Some(prev) = slot.last_fire {
                st.last_period_us = micros(now.saturating_duration_since(prev));
            }
            slot.last_fire = Some(now);

            (slot.handler)(ctx);
            fired += 1;
        }
        fired
    }

    /// Earliest deadline among armed slots.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.iter().flatten().map(|s| s.deadline).min()
    }

    /// Time until the earliest deadline (zero when one is already due).
    pub fn time_to_next(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.next_deadline()
            .map(|d| d.saturating_duration_since(now))
    }

    /// Sleep the clock until the next deadline, or briefly when nothing is armed.
    pub fn idle(&self) {
        let d = self.time_to_next().unwrap_or(IDLE_POLL);
        self.clock.sleep(d);
    }

    /// Busy-wait: service slots until `done` holds. With `limit == None` the
    /// wait is unbounded and only ends when `done` turns true.
    ///
    /// Returns whether `done` was reached.
    pub fn wait_until(
        &mut self,
        ctx: &mut Ctx,
        mut done: impl FnMut(&mut Ctx) -> bool,
        limit: Option<Duration>,
    ) -> bool {
        let start = self.clock.now();
        loop {
            self.service(ctx);
            if done(ctx) {
                return true;
            }
            if let Some(limit) = limit {
                if self.clock.now().saturating_duration_since(start) >= limit {
                    return false;
                }
            }
            self.idle();
        }
    }
}

struct Shared<Ctx> {
    scheduler: Scheduler<Ctx>,
    ctx: Ctx,
}

/// Background thread that owns a scheduler and its context.
///
/// The thread services due slots and sleeps until the next deadline; the
/// foreground reaches the pair through `with`. After each servicing pass the
/// probe may publish a value, of which only the most recent is kept.
///
/// Each `SchedulerThread` spawns exactly one thread, shut down and joined on
/// drop.
pub struct SchedulerThread<Ctx, T = ()> {
    shared: Arc<Mutex<Shared<Ctx>>>,
    rx: xch::Receiver<T>,
    /// Shutdown flag for immediate response (atomic for lock-free check)
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl<Ctx: Send + 'static, T: Send + 'static> SchedulerThread<Ctx, T> {
    pub fn spawn<P>(scheduler: Scheduler<Ctx>, ctx: Ctx, probe: P) -> Self
    where
        P: Fn(&Ctx) -> Option<T> + Send + 'static,
    {
        let (tx, rx) = xch::bounded(1);
        let drain = rx.clone();
        let clock = scheduler.clock().clone();
        let shared = Arc::new(Mutex::new(Shared { scheduler, ctx }));
        let shared_bg = shared.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_bg = shutdown.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_bg.load(Ordering::Relaxed) {
                    tracing::debug!("scheduler thread received shutdown signal");
                    break;
                }
                let wait = {
                    let Ok(mut guard) = shared_bg.lock() else {
                        tracing::warn!("scheduler state poisoned, exiting thread");
                        break;
                    };
                    let g = &mut *guard;
                    if g.scheduler.service(&mut g.ctx) > 0 {
                        if let Some(v) = probe(&g.ctx) {
                            if let Err(xch::TrySendError::Full(v)) = tx.try_send(v) {
                                // Replace the stale value nobody picked up.
                                let _ = drain.try_recv();
                                let _ = tx.try_send(v);
                            }
                        }
                    }
                    g.scheduler.time_to_next().unwrap_or(THREAD_MAX_IDLE)
                };
                clock.sleep(wait.min(THREAD_MAX_IDLE));
            }
            tracing::trace!("scheduler thread exiting cleanly");
        });

        Self {
            shared,
            rx,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Run `f` with exclusive access to the scheduler and its context.
    pub fn with<R>(&self, f: impl FnOnce(&mut Scheduler<Ctx>, &mut Ctx) -> R) -> Result<R> {
        let mut guard = self
            .shared
            .lock()
            .map_err(|_| TracerError::State("scheduler state poisoned".into()))?;
        let g = &mut *guard;
        Ok(f(&mut g.scheduler, &mut g.ctx))
    }

    /// Most recent probe value, if one arrived since the last call.
    pub fn latest(&self) -> Option<T> {
        self.rx.try_iter().last()
    }

    /// Stop the thread and hand back the scheduler and context.
    pub fn into_inner(mut self) -> Option<(Scheduler<Ctx>, Ctx)> {
        self.join();
        let shared = self.shared.clone();
        drop(self);
        let state = Arc::try_unwrap(shared).ok()?.into_inner().ok()?;
        Some((state.scheduler, state.ctx))
    }
}

impl<Ctx, T> SchedulerThread<Ctx, T> {
    fn join(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                tracing::warn!("scheduler thread panicked");
            }
        }
    }
}

impl<Ctx, T> Drop for SchedulerThread<Ctx, T> {
    fn drop(&mut self) {
        self.join();
    }
}
