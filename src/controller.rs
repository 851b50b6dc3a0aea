use super::{
    pool::{Config, Shared},
    sync::lock_or_recover,
    worker::{self, WorkerId, WorkerState, WorkerThread},
};
use crossbeam::channel::{self, Receiver};
use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};


/// Текущий лидер и очередь простаивающих, меняются только вместе
struct Leadership {
    leader: Option<WorkerId>,
    idle: VecDeque<Arc<WorkerThread>>,
}

/// Владеет рабочими потоками, держит число потоков в `[min, max]`
/// и сокращает пул после простоя.
pub(crate) struct PoolController {
    min_threads: usize,
    max_threads: usize,
    idle_timeout: Duration,
    tick: Duration,
    thread_name_prefix: String,
    stack_size: Option<usize>,
    running: CancellationToken,
    thread_count: AtomicUsize,
    // остановленные, но ещё не завершившиеся потоки
    retiring: AtomicUsize,
    next_id: AtomicU64,
    leadership: Mutex<Leadership>,
    workers: Mutex<HashMap<WorkerId, Arc<WorkerThread>>>,
    exited: Condvar,
    epoch: Instant,
    last_dequeue_ms: AtomicU64,
}

impl PoolController {
    pub fn new(config: &Config) -> Self {
        Self {
            min_threads: config.min_threads,
            max_threads: config.max_threads,
            idle_timeout: config.idle_timeout,
            tick: config.maintenance_tick.max(Duration::from_millis(1)),
            thread_name_prefix: config.thread_name_prefix.clone(),
            stack_size: config.stack_size,
            running: CancellationToken::new(),
            thread_count: AtomicUsize::new(0),
            retiring: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            leadership: Mutex::new(Leadership {
                leader: None,
                idle: VecDeque::with_capacity(config.max_threads),
            }),
            workers: Mutex::new(HashMap::with_capacity(config.max_threads)),
            exited: Condvar::new(),
            epoch: Instant::now(),
            last_dequeue_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        !self.running.is_cancelled()
    }

    #[inline]
    pub fn tick(&self) -> Duration {
        self.tick
    }

    #[inline]
    pub fn thread_count(&self) -> usize {
        self.thread_count.load(Ordering::SeqCst)
    }

    /// Потоки без учёта уже снятых, но ещё не вышедших
    pub fn live_threads(&self) -> usize {
        self.thread_count().saturating_sub(self.retiring.load(Ordering::SeqCst))
    }

    /// Первые `min` потоков: один лидер, остальные в очереди простаивающих
    pub fn bootstrap(&self, shared: &Arc<Shared>) -> io::Result<()> {
        if let Some(id) = self.reserve() {
            lock_or_recover(&self.leadership).leader = Some(id);
            if let Err(err) = self.launch(shared, id, WorkerState::LeaderWaiting) {
                self.thread_count.fetch_sub(1, Ordering::SeqCst);
                lock_or_recover(&self.leadership).leader = None;
                return Err(err);
            }
        }
        for _ in 1..self.min_threads {
            match self.create_thread(shared, WorkerState::Follower)? {
                Some(worker) => lock_or_recover(&self.leadership).idle.push_back(worker),
                None => break,
            }
        }
        info!(threads = self.thread_count(), max = self.max_threads, "worker threads started");
        Ok(())
    }

    /// Создаёт поток, если не достигнут максимум, иначе `None`
    pub fn create_thread(&self, shared: &Arc<Shared>, state: WorkerState) -> io::Result<Option<Arc<WorkerThread>>> {
        let Some(id) = self.reserve() else {
            return Ok(None);
        };
        match self.launch(shared, id, state) {
            Ok(worker) => Ok(Some(worker)),
            Err(err) => {
                self.thread_count.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn reserve(&self) -> Option<WorkerId> {
        self.thread_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count < self.max_threads).then_some(count + 1)
            })
            .ok()?;
        Some(WorkerId::new(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn launch(&self, shared: &Arc<Shared>, id: WorkerId, state: WorkerState) -> io::Result<Arc<WorkerThread>> {
        let worker = Arc::new(WorkerThread::new(id, state));
        lock_or_recover(&self.workers).insert(id, worker.clone());

        let mut builder = thread::Builder::new().name(format!("{}-{}", self.thread_name_prefix, id));
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let spawned = {
            let shared = shared.clone();
            let worker = worker.clone();
            builder.spawn(move || worker::run(shared, worker))
        };

        match spawned {
            Ok(_) => {
                debug!(worker = %id, ?state, "worker thread created");
                Ok(worker)
            }
            Err(err) => {
                lock_or_recover(&self.workers).remove(&id);
                Err(err)
            }
        }
    }

    pub fn is_leader(&self, id: WorkerId) -> bool {
        lock_or_recover(&self.leadership).leader == Some(id)
    }

    /// Назначает преемника: первый простаивающий, иначе новый поток,
    /// иначе лидера временно нет.
    pub fn promote_successor(&self, shared: &Arc<Shared>) {
        let mut leadership = lock_or_recover(&self.leadership);
        let next = leadership.idle.pop_front();
        if let Some(next) = next {
            leadership.leader = Some(next.id());
            drop(leadership);
            debug!(worker = %next.id(), "follower promoted to leader");
            next.wake();
            return;
        }

        let Some(id) = self.reserve() else {
            leadership.leader = None;
            debug!("no successor available, leader slot vacant");
            return;
        };
        leadership.leader = Some(id);
        drop(leadership);

        if let Err(err) = self.launch(shared, id, WorkerState::LeaderWaiting) {
            warn!(error = %err, "failed to spawn successor leader");
            self.thread_count.fetch_sub(1, Ordering::SeqCst);
            let mut leadership = lock_or_recover(&self.leadership);
            if leadership.leader == Some(id) {
                leadership.leader = None;
            }
        }
    }

    /// `true`: поток сам забрал пустующее лидерство, иначе он встал в очередь простаивающих
    pub fn return_to_idle(&self, me: &Arc<WorkerThread>) -> bool {
        let mut leadership = lock_or_recover(&self.leadership);
        if leadership.leader.is_none() {
            leadership.leader = Some(me.id());
            true
        } else {
            leadership.idle.push_back(me.clone());
            false
        }
    }

    pub fn idle_snapshot(&self) -> (usize, bool) {
        let leadership = lock_or_recover(&self.leadership);
        (leadership.idle.len(), leadership.leader.is_some())
    }

    pub fn busy_threads(&self) -> usize {
        lock_or_recover(&self.workers)
            .values()
            .filter(|w| w.state() == WorkerState::Processing)
            .count()
    }

    /// Отметка «работу только что брали из очереди»
    pub fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_dequeue_ms.store(now, Ordering::Release);
    }

    fn idle_for(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_dequeue_ms.load(Ordering::Acquire);
        Duration::from_millis(now.saturating_sub(last))
    }

    /// Снимает простаивающие потоки по одному, пока пул не упрётся в минимум
    /// или пока новая работа не сбросит таймер простоя.
    pub fn evict_idle(&self) {
        if self.idle_timeout.is_zero() {
            return;
        }
        let mut evicted = 0;
        while self.is_running() && self.idle_for() >= self.idle_timeout {
            let victim = {
                let mut leadership = lock_or_recover(&self.leadership);
                let live = self.live_threads();
                if live <= self.min_threads {
                    break;
                }
                match leadership.idle.pop_front() {
                    Some(victim) => victim,
                    None => break,
                }
            };
            self.retiring.fetch_add(1, Ordering::SeqCst);
            victim.stop();
            debug!(worker = %victim.id(), "idle worker evicted");
            evicted += 1;
        }
        if evicted > 0 {
            info!(evicted, threads = self.live_threads(), "pool shrunk after idle timeout");
        }
    }

    /// Вызывается самим потоком при выходе из цикла
    pub fn retire(&self, me: &WorkerThread) {
        let mut workers = lock_or_recover(&self.workers);
        workers.remove(&me.id());
        if !me.is_running() {
            self.retiring.fetch_sub(1, Ordering::SeqCst);
        }
        self.thread_count.fetch_sub(1, Ordering::SeqCst);
        debug!(worker = %me.id(), remaining = self.thread_count(), "worker thread exited");
        self.exited.notify_all();
    }

    /// Останавливает приём работы и будит всех
    pub fn stop(&self) {
        self.running.cancel();
        for worker in lock_or_recover(&self.workers).values() {
            worker.wake();
        }
    }

    pub fn wait_for_exit(&self) {
        let mut workers = lock_or_recover(&self.workers);
        while self.thread_count() > 0 {
            workers = self
                .exited
                .wait_timeout(workers, self.tick)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        drop(workers);

        let mut leadership = lock_or_recover(&self.leadership);
        leadership.leader = None;
        leadership.idle.clear();
    }
}


/// Фоновый цикл обслуживания: раз в тик проверяет простой пула
pub(crate) fn maintenance_loop(shared: Arc<Shared>, stop: Receiver<()>) {
    let ticker = channel::tick(shared.controller.tick());
    loop {
        crossbeam::select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => shared.controller.evict_idle(),
        }
    }
    debug!("maintenance loop stopped");
}
