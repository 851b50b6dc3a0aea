use serde::{Deserialize, Serialize};


/// Уровни приоритета работы.
///
/// `Invalid` это сторожевое значение, в очередь его положить нельзя.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Invalid,
    Lowest,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    Highest,
}

impl Priority {
    /// Все допустимые уровни, от низшего к высшему
    pub const LEVELS: [Priority; 5] = [
        Priority::Lowest,
        Priority::BelowNormal,
        Priority::Normal,
        Priority::AboveNormal,
        Priority::Highest,
    ];

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Priority::Invalid
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    Pending,
    Completed,
}


/// Снимок состояния пула
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    pub thread_count: usize,
    pub busy_threads: usize,
    pub idle_threads: usize,
    pub has_leader: bool,
    pub queued_items: usize,
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl PoolMetrics {
    /// Доля потоков, исполняющих работу
    pub fn utilization(&self) -> f64 {
        if self.thread_count == 0 {
            return 0.0;
        }
        self.busy_threads as f64 / self.thread_count as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            return 1.0;
        }
        self.completed as f64 / total as f64
    }
}
