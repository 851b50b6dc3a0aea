//! Пул потоков по схеме лидер/последователь с приоритетной очередью работ
//!
//! # Features
//! - Один лидер ждёт работу, остальные потоки спят на личном сигнале
//! - Пул растёт до `max_threads` и сокращается до `min_threads` после простоя
//! - Пять уровней приоритета, FIFO внутри уровня, смена приоритета и отзыв задачи из очереди
//! - Контракт завершения задачи: блокирующее и async ожидание, callback, ошибки и паники
//! - Самоотмена задачи через `WorkContext`
//! - Метрики и конфигурация для CPU-bound и I/O-bound нагрузки

mod controller;
pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;
pub mod queue;
pub mod registry;
mod sync;
pub mod worker;

pub use errors::{PoolError, PoolResult, QueueError, WorkError, WorkErrorKind};
pub use handle::{join_all, WorkContext, WorkItem, WorkItemBuilder};
pub use model::{PoolMetrics, Priority, WorkStatus};
pub use pool::{Config, LeaderFollowerPool};
pub use queue::{PriorityQueue, QueueHandle};
pub use registry::Registry;
pub use worker::WorkerId;
