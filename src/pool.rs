use super::{
    controller::{self, PoolController},
    errors::{PoolError, PoolResult, QueueError},
    handle::WorkItem,
    model::{PoolMetrics, Priority},
    queue::{PriorityQueue, QueueHandle},
    registry::Registry,
    sync::lock_or_recover,
};
use crossbeam::channel::{self, Sender};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, info, warn};


/// Конфигурация пула потоков
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_threads: usize,
    pub min_threads: usize,
    /// Простой, после которого лишние потоки снимаются. Ноль отключает сокращение.
    #[serde(with = "secs")]
    pub idle_timeout: Duration,
    #[serde(with = "millis")]
    pub maintenance_tick: Duration,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_threads: num_cpus::get().max(5),
            min_threads: 5,
            idle_timeout: Duration::from_secs(60),
            maintenance_tick: Duration::from_secs(1),
            thread_name_prefix: "lf-worker".to_string(),
            stack_size: None,
        }
    }
}

impl Config {
    /// Проверяет аргументы так же, как `LeaderFollowerPool::create`
    pub fn new(max_threads: usize, min_threads: usize, idle_timeout_secs: i64) -> PoolResult<Self> {
        let idle_secs = u64::try_from(idle_timeout_secs)
            .map_err(|_| PoolError::NegativeIdleTimeout(idle_timeout_secs))?;
        let config = Self {
            max_threads,
            min_threads,
            idle_timeout: Duration::from_secs(idle_secs),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            max_threads: num_cpus,
            min_threads: 1,
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            max_threads: num_cpus * 4,
            min_threads: num_cpus,
            idle_timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }

    pub fn with_threads(mut self, min_threads: usize, max_threads: usize) -> Self {
        self.min_threads = min_threads;
        self.max_threads = max_threads;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_maintenance_tick(mut self, tick: Duration) -> Self {
        self.maintenance_tick = tick;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.min_threads < 1 {
            return Err(PoolError::MinBelowOne);
        }
        if self.max_threads < self.min_threads {
            return Err(PoolError::MaxBelowMin {
                max: self.max_threads,
                min: self.min_threads,
            });
        }
        Ok(())
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}


#[derive(Debug, Default)]
pub(crate) struct Stats {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
}

impl Stats {
    #[inline]
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }
}


/// Всё, что видят рабочие потоки
pub(crate) struct Shared {
    pub queue: Mutex<PriorityQueue<WorkItem>>,
    /// Лидер спит здесь, пока очередь пуста
    pub work_ready: Condvar,
    pub controller: PoolController,
    pub registry: Registry,
    pub stats: Stats,
    #[cfg(test)]
    pub waiting_leaders: super::worker::WaitGauge,
}

impl Shared {
    #[inline]
    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }
}


/// Пул потоков лидер/последователь с приоритетной очередью.
///
/// Размер пула держится в `[min_threads, max_threads]`: растёт, когда лидеру
/// некому передать роль, и сокращается обратно после простоя.
/// Оставшиеся в очереди при остановке задачи не исполняются.
pub struct LeaderFollowerPool {
    shared: Arc<Shared>,
    config: Config,
    maintenance: Option<JoinHandle<()>>,
    stop_maintenance: Option<Sender<()>>,
    closed: bool,
}

impl LeaderFollowerPool {
    pub fn new(config: Config, registry: Registry) -> PoolResult<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            queue: Mutex::new(PriorityQueue::new()),
            work_ready: Condvar::new(),
            controller: PoolController::new(&config),
            registry,
            stats: Stats::default(),
            #[cfg(test)]
            waiting_leaders: Default::default(),
        });
        let mut pool = Self {
            shared,
            config,
            maintenance: None,
            stop_maintenance: None,
            closed: false,
        };

        // при ошибке Drop останавливает уже запущенные потоки
        pool.shared.controller.bootstrap(&pool.shared).map_err(PoolError::Spawn)?;

        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let maintenance = {
            let shared = pool.shared.clone();
            thread::Builder::new()
                .name(format!("{}-maintenance", pool.config.thread_name_prefix))
                .spawn(move || controller::maintenance_loop(shared, stop_rx))
                .map_err(PoolError::Spawn)?
        };
        pool.maintenance = Some(maintenance);
        pool.stop_maintenance = Some(stop_tx);

        info!(
            min = pool.config.min_threads,
            max = pool.config.max_threads,
            idle_timeout = ?pool.config.idle_timeout,
            "leader/follower pool started"
        );
        Ok(pool)
    }

    /// `idle_timeout_secs == 0` отключает сокращение пула
    pub fn create(max_threads: usize, min_threads: usize, idle_timeout_secs: i64, registry: Registry) -> PoolResult<Self> {
        Self::new(Config::new(max_threads, min_threads, idle_timeout_secs)?, registry)
    }

    #[inline]
    pub fn submit(&self, item: &WorkItem) -> Result<QueueHandle, QueueError> {
        self.submit_with_priority(item, Priority::Normal)
    }

    /// Ставит задачу в очередь и сразу возвращается
    pub fn submit_with_priority(&self, item: &WorkItem, priority: Priority) -> Result<QueueHandle, QueueError> {
        let handle = lock_or_recover(&self.shared.queue).enqueue(priority, item.clone())?;
        self.shared.stats.record_submitted();
        self.shared.work_ready.notify_one();
        Ok(handle)
    }

    /// Забирает ещё не взятую в работу задачу. Она не исполняется и не завершается.
    pub fn withdraw(&self, handle: QueueHandle) -> Result<WorkItem, QueueError> {
        let item = lock_or_recover(&self.shared.queue).remove_item(handle)?;
        debug!(group = item.group(), name = item.name(), "work item withdrawn");
        Ok(item)
    }

    pub fn reprioritize(&self, handle: QueueHandle, priority: Priority) -> Result<(), QueueError> {
        lock_or_recover(&self.shared.queue).change_item_priority(handle, priority)
    }

    pub fn thread_count(&self) -> usize {
        self.shared.controller.thread_count()
    }

    pub fn metrics(&self) -> PoolMetrics {
        let queued_items = lock_or_recover(&self.shared.queue).len();
        let (idle_threads, has_leader) = self.shared.controller.idle_snapshot();
        let stats = &self.shared.stats;
        PoolMetrics {
            thread_count: self.shared.controller.thread_count(),
            busy_threads: self.shared.controller.busy_threads(),
            idle_threads,
            has_leader,
            queued_items,
            submitted: stats.submitted.load(Ordering::Relaxed),
            completed: stats.completed.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            cancelled: stats.cancelled.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Дожидается выхода всех потоков. Задачи из очереди отбрасываются.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!("stopping leader/follower pool");

        self.shared.controller.stop();
        {
            let _queue = lock_or_recover(&self.shared.queue);
            self.shared.work_ready.notify_all();
        }

        drop(self.stop_maintenance.take());
        if let Some(maintenance) = self.maintenance.take() {
            if maintenance.join().is_err() {
                warn!("maintenance thread panicked");
            }
        }

        self.shared.controller.wait_for_exit();

        let abandoned = {
            let mut queue = lock_or_recover(&self.shared.queue);
            let abandoned = queue.len();
            *queue = PriorityQueue::new();
            abandoned
        };
        if abandoned > 0 {
            info!(abandoned, "queued work items abandoned");
        }
        info!("leader/follower pool stopped");
    }
}

impl Drop for LeaderFollowerPool {
    fn drop(&mut self) {
        self.close();
    }
}
