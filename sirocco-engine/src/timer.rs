//! Deterministic 1 Hz timer wheel.
//!
//! The engine main loop calls [`TimerService::tick`] once per elapsed
//! second; any task whose `next_fire` tick has been reached runs on the
//! calling thread and is advanced by its interval. The `phase` argument
//! aligns first firings to `total_seconds % interval == phase`, which is
//! how the position reconciler staggers its position and account queries
//! under the exchange's one-query-per-second cap.

use std::sync::Arc;

use parking_lot::Mutex;

struct TimerTask {
    interval: u64,
    next_fire: u64,
    callback: Box<dyn FnMut() + Send>,
}

#[derive(Default)]
struct TimerInner {
    total_seconds: u64,
    tasks: Vec<TimerTask>,
}

/// Shared handle to the engine's timer wheel.
#[derive(Clone, Default)]
pub struct TimerService {
    inner: Arc<Mutex<TimerInner>>,
}

impl TimerService {
    /// Creates an empty timer service at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a periodic callback.
    ///
    /// The first firing lands on the earliest future tick where
    /// `total_seconds % interval_sec == phase_sec`; afterwards the task
    /// advances by `interval_sec`. A zero interval is ignored.
    pub fn add_timer<F>(&self, interval_sec: u64, phase_sec: u64, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        if interval_sec == 0 {
            return;
        }
        let phase = phase_sec % interval_sec;

        let mut inner = self.inner.lock();
        let first_run = inner.total_seconds + 1;
        let base = first_run / interval_sec * interval_sec;
        let mut next_fire = base + phase;
        if next_fire < first_run {
            next_fire += interval_sec;
        }
        inner.tasks.push(TimerTask {
            interval: interval_sec,
            next_fire,
            callback: Box::new(callback),
        });
    }

    /// Advances the wheel by one second and runs every due callback on the
    /// calling thread.
    ///
    /// Callbacks run outside the internal lock, so a callback may register
    /// further timers.
    pub fn tick(&self) {
        let (mut tasks, total) = {
            let mut inner = self.inner.lock();
            inner.total_seconds += 1;
            (std::mem::take(&mut inner.tasks), inner.total_seconds)
        };

        for task in &mut tasks {
            if total >= task.next_fire {
                (task.callback)();
                task.next_fire += task.interval;
            }
        }

        let mut inner = self.inner.lock();
        // Tasks added by callbacks landed in inner.tasks; keep them after
        // the original registrations.
        let added = std::mem::take(&mut inner.tasks);
        tasks.extend(added);
        inner.tasks = tasks;
    }

    /// The monotonic tick counter.
    #[must_use]
    pub fn total_seconds(&self) -> u64 {
        self.inner.lock().total_seconds
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.lock().tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(timer: &TimerService, interval: u64, phase: u64) -> Arc<Mutex<Vec<u64>>> {
        let fires = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fires);
        let clock = timer.clone();
        timer.add_timer(interval, phase, move || {
            sink.lock().push(clock.total_seconds());
        });
        fires
    }

    /// interval=10/phase=0 fires at 10 and 20; interval=10/phase=2 fires
    /// at 2, 12, and 22.
    #[test]
    fn test_phase_alignment() {
        let timer = TimerService::new();
        let a = recorder(&timer, 10, 0);
        let b = recorder(&timer, 10, 2);

        for _ in 0..22 {
            timer.tick();
        }

        assert_eq!(*a.lock(), vec![10, 20]);
        assert_eq!(*b.lock(), vec![2, 12, 22]);
    }

    #[test]
    fn test_interval_one_fires_every_tick() {
        let timer = TimerService::new();
        let fires = recorder(&timer, 1, 0);
        for _ in 0..5 {
            timer.tick();
        }
        assert_eq!(*fires.lock(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_zero_interval_ignored() {
        let timer = TimerService::new();
        timer.add_timer(0, 0, || {});
        assert_eq!(timer.task_count(), 0);
    }

    #[test]
    fn test_phase_wraps_modulo_interval() {
        let timer = TimerService::new();
        // phase 12 on interval 10 behaves as phase 2.
        let fires = recorder(&timer, 10, 12);
        for _ in 0..12 {
            timer.tick();
        }
        assert_eq!(*fires.lock(), vec![2, 12]);
    }

    #[test]
    fn test_registration_mid_stream_aligns_forward() {
        let timer = TimerService::new();
        for _ in 0..5 {
            timer.tick();
        }
        // total_seconds = 5; phase 0 on interval 10 must first fire at 10.
        let fires = recorder(&timer, 10, 0);
        for _ in 0..15 {
            timer.tick();
        }
        assert_eq!(*fires.lock(), vec![10, 20]);
    }

    #[test]
    fn test_callback_may_add_timer() {
        let timer = TimerService::new();
        let inner_fires = Arc::new(Mutex::new(Vec::new()));

        let timer_handle = timer.clone();
        let sink = Arc::clone(&inner_fires);
        let mut registered = false;
        timer.add_timer(1, 0, move || {
            if !registered {
                registered = true;
                let sink = Arc::clone(&sink);
                let clock = timer_handle.clone();
                timer_handle.add_timer(2, 0, move || {
                    sink.lock().push(clock.total_seconds());
                });
            }
        });

        for _ in 0..6 {
            timer.tick();
        }
        // Registered at tick 1, so the 2-second task fires at 2, 4, 6.
        assert_eq!(*inner_fires.lock(), vec![2, 4, 6]);
    }
}
