//! Рабочий поток и цикл лидер/последователь.
//!
//! Лидер ждёт работу, забирает ровно одну задачу, назначает преемника и
//! только потом исполняет задачу. После исполнения поток либо сразу снова
//! становится лидером (если лидера нет), либо уходит в очередь простаивающих.

use super::{
    errors::{WorkError, WorkErrorKind},
    handle::{WorkContext, WorkItem},
    pool::Shared,
    sync::{lock_or_recover, WakeSignal},
};
use crossbeam::utils::Backoff;
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
};
use tracing::{debug, trace, warn};


/// Идентификатор рабочего потока. Состояние потока наружу не публикуется:
///
/// ```compile_fail
/// use leader_follower::worker::WorkerState;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerState {
    Follower,
    LeaderWaiting,
    Processing,
    Terminating,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Follower,
            1 => WorkerState::LeaderWaiting,
            2 => WorkerState::Processing,
            _ => WorkerState::Terminating,
        }
    }
}


pub(crate) struct WorkerThread {
    id: WorkerId,
    wake: WakeSignal,
    running: AtomicBool,
    state: AtomicU8,
}

impl WorkerThread {
    pub fn new(id: WorkerId, state: WorkerState) -> Self {
        Self {
            id,
            wake: WakeSignal::new(),
            running: AtomicBool::new(true),
            state: AtomicU8::new(state as u8),
        }
    }

    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Единственный способ попросить поток выйти из цикла
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.wake.signal();
    }

    #[inline]
    pub fn wake(&self) {
        self.wake.signal();
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}


/// Сколько потоков одновременно находятся в `next_item`
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct WaitGauge {
    current: std::sync::atomic::AtomicUsize,
    peak: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl WaitGauge {
    fn enter(&self) -> WaitGaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        WaitGaugeGuard(self)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
struct WaitGaugeGuard<'a>(&'a WaitGauge);

#[cfg(test)]
impl Drop for WaitGaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}


/// При любом выходе из цикла (в том числе при панике) поток снимается с учёта
struct RetireGuard<'a> {
    shared: &'a Shared,
    me: &'a WorkerThread,
}

impl Drop for RetireGuard<'_> {
    fn drop(&mut self) {
        self.me.set_state(WorkerState::Terminating);
        self.shared.controller.retire(self.me);
    }
}


pub(crate) fn run(shared: Arc<Shared>, me: Arc<WorkerThread>) {
    let _guard = RetireGuard { shared: &shared, me: &me };
    debug!(worker = %me.id(), state = ?me.state(), "worker started");

    while shared.is_running() && me.is_running() {
        match me.state() {
            WorkerState::Follower => {
                // без таймаута: будит только явный сигнал
                me.wake.wait();
                if shared.controller.is_leader(me.id()) {
                    trace!(worker = %me.id(), "promoted to leader");
                    me.set_state(WorkerState::LeaderWaiting);
                }
            }
            _ => {
                shared.controller.touch();
                let Some(item) = next_item(&shared, &me) else {
                    continue;
                };
                me.set_state(WorkerState::Processing);
                shared.controller.touch();
                shared.controller.promote_successor(&shared);

                execute(&shared, &me, item);

                if shared.controller.return_to_idle(&me) {
                    me.set_state(WorkerState::LeaderWaiting);
                } else {
                    me.set_state(WorkerState::Follower);
                }
            }
        }
    }

    debug!(worker = %me.id(), "worker stopping");
}

/// Ожидание лидера: короткий спин, затем сон на condvar очереди.
/// `None`, если пул или поток останавливаются.
fn next_item(shared: &Shared, me: &WorkerThread) -> Option<WorkItem> {
    #[cfg(test)]
    let _waiting = shared.waiting_leaders.enter();

    let backoff = Backoff::new();
    let mut queue = lock_or_recover(&shared.queue);
    loop {
        if !shared.is_running() || !me.is_running() {
            return None;
        }
        if let Ok(item) = queue.dequeue() {
            return Some(item);
        }
        if backoff.is_completed() {
            queue = shared
                .work_ready
                .wait_timeout(queue, shared.controller.tick())
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        } else {
            drop(queue);
            backoff.snooze();
            queue = lock_or_recover(&shared.queue);
        }
    }
}

/// Граница диспетчеризации: ни ошибка, ни паника задачи не убивают поток,
/// задача всегда завершается.
fn execute(shared: &Shared, me: &WorkerThread, item: WorkItem) {
    let ctx = WorkContext::new(me.id());
    let function = item
        .function()
        .cloned()
        .or_else(|| shared.registry.get(item.group(), item.name()));

    let result = match function {
        Some(function) => panic::catch_unwind(AssertUnwindSafe(|| function(&item, &ctx)))
            .unwrap_or_else(|payload| Err(WorkError::panicked(payload))),
        None => Err(WorkError::function_not_found(item.group(), item.name())),
    };

    if ctx.is_cancelled() {
        debug!(worker = %me.id(), group = item.group(), name = item.name(), "work item cancelled itself");
        shared.stats.record_cancelled();
        if !item.is_completed() {
            item.mark_cancelled();
            finish(me, &item);
        }
        return;
    }

    match result {
        Ok(()) => {
            shared.stats.record_completed();
            if !item.is_completed() {
                finish(me, &item);
            }
        }
        // задача завершилась сама, паника пришла из её callback
        Err(err) if err.kind() == WorkErrorKind::Panicked && item.is_completed() => {
            warn!(worker = %me.id(), group = item.group(), name = item.name(), error = %err, "work item panicked after completing itself");
            shared.stats.record_completed();
        }
        Err(err) => {
            warn!(worker = %me.id(), group = item.group(), name = item.name(), error = %err, "work item failed");
            shared.stats.record_failed();
            if item.is_completed() {
                debug!(worker = %me.id(), "error reported after completion is dropped");
            } else {
                item.set_error(err);
                finish(me, &item);
            }
        }
    }
}

fn finish(me: &WorkerThread, item: &WorkItem) {
    if panic::catch_unwind(AssertUnwindSafe(|| item.complete())).is_err() {
        warn!(worker = %me.id(), group = item.group(), name = item.name(), "completion callback panicked");
    }
}
