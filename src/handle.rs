use super::{
    errors::{WorkError, WorkErrorKind},
    model::WorkStatus,
    sync::lock_or_recover,
    worker::WorkerId,
};
use std::{
    any::Any,
    fmt,
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;


/// Непрозрачные данные задачи (вход, выход, состояние вызывающего)
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Рабочая функция. Может сама вызвать `complete`, иначе это сделает пул.
pub type WorkFn = Arc<dyn Fn(&WorkItem, &WorkContext) -> Result<(), WorkError> + Send + Sync>;

type Callback = Box<dyn FnOnce(&WorkItem) + Send + 'static>;

struct Slot {
    status: WorkStatus,
    output: Option<Payload>,
    error: Option<WorkError>,
    cancelled: bool,
}

struct Inner {
    group: String,
    name: String,
    input: Payload,
    state: Option<Payload>,
    function: Option<WorkFn>,
    callback: Mutex<Option<Callback>>,
    slot: Mutex<Slot>,
    done: Condvar,
    notify: Notify,
}


/// Единица работы с асинхронным контрактом завершения.
///
/// Клонирование дешёвое: все клоны смотрят на одну и ту же задачу.
/// Менять задачу может только исполняющий её поток, после `complete`
/// задача больше не меняется.
#[derive(Clone)]
pub struct WorkItem {
    inner: Arc<Inner>,
}

impl WorkItem {
    pub fn new<T>(group: impl Into<String>, name: impl Into<String>, input: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::builder(group, name).input(input).build()
    }

    pub fn builder(group: impl Into<String>, name: impl Into<String>) -> WorkItemBuilder {
        WorkItemBuilder {
            group: group.into(),
            name: name.into(),
            input: Arc::new(()),
            state: None,
            function: None,
            callback: None,
        }
    }

    #[inline]
    pub fn group(&self) -> &str {
        &self.inner.group
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn input<T: Any>(&self) -> Option<&T> {
        self.inner.input.downcast_ref::<T>()
    }

    /// Состояние, переданное вызывающим при создании
    pub fn state<T: Any>(&self) -> Option<&T> {
        self.inner.state.as_ref()?.downcast_ref::<T>()
    }

    pub(crate) fn function(&self) -> Option<&WorkFn> {
        self.inner.function.as_ref()
    }

    pub fn set_output<T>(&self, output: T)
    where
        T: Any + Send + Sync,
    {
        let mut slot = self.pending_slot();
        slot.output = Some(Arc::new(output));
    }

    pub fn output<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let output = lock_or_recover(&self.inner.slot).output.clone()?;
        output.downcast::<T>().ok()
    }

    pub fn set_error(&self, error: WorkError) {
        let mut slot = self.pending_slot();
        slot.error = Some(error);
    }

    pub fn error(&self) -> Option<WorkError> {
        lock_or_recover(&self.inner.slot).error.clone()
    }

    /// `Err` с ошибкой, если исполнение её зафиксировало
    pub fn outcome(&self) -> Result<(), WorkError> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn status(&self) -> WorkStatus {
        lock_or_recover(&self.inner.slot).status
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.status() == WorkStatus::Completed
    }

    /// Задача отменила сама себя через `WorkContext::cancel_self`
    pub fn was_cancelled(&self) -> bool {
        lock_or_recover(&self.inner.slot).cancelled
    }

    pub(crate) fn mark_cancelled(&self) {
        self.pending_slot().cancelled = true;
    }

    /// Завершает задачу: будит всех ожидающих, затем вызывает callback.
    ///
    /// # Panics
    ///
    /// При повторном вызове: это ошибка программиста.
    pub fn complete(&self) {
        {
            let mut slot = lock_or_recover(&self.inner.slot);
            assert!(
                slot.status == WorkStatus::Pending,
                "work item {}/{} completed twice",
                self.inner.group,
                self.inner.name
            );
            slot.status = WorkStatus::Completed;
        }
        self.inner.done.notify_all();
        self.inner.notify.notify_waiters();

        let callback = lock_or_recover(&self.inner.callback).take();
        if let Some(callback) = callback {
            callback(self);
        }
    }

    /// Блокирует поток до завершения задачи
    pub fn wait(&self) {
        let mut slot = lock_or_recover(&self.inner.slot);
        while slot.status == WorkStatus::Pending {
            slot = self
                .inner
                .done
                .wait(slot)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// `true`, если задача завершилась до истечения таймаута
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let slot = lock_or_recover(&self.inner.slot);
        let (slot, _) = self
            .inner
            .done
            .wait_timeout_while(slot, timeout, |slot| slot.status == WorkStatus::Pending)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.status == WorkStatus::Completed
    }

    /// Асинхронное ожидание завершения
    pub async fn completed(&self) {
        loop {
            // Notified создаётся до проверки, чтобы не потерять notify_waiters
            let notified = self.inner.notify.notified();
            if self.is_completed() {
                return;
            }
            notified.await;
        }
    }

    pub async fn await_timeout(&self, timeout: Duration) -> Result<(), WorkError> {
        tokio::time::timeout(timeout, self.completed())
            .await
            .map_err(|_| {
                WorkError::new(
                    WorkErrorKind::Timeout,
                    format!("{}/{} did not complete within {:?}", self.group(), self.name(), timeout),
                )
            })
    }

    #[inline]
    pub fn ptr_eq(&self, other: &WorkItem) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn pending_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        let slot = lock_or_recover(&self.inner.slot);
        assert!(
            slot.status == WorkStatus::Pending,
            "work item {}/{} modified after completion",
            self.inner.group,
            self.inner.name
        );
        slot
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("group", &self.inner.group)
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .finish()
    }
}


pub struct WorkItemBuilder {
    group: String,
    name: String,
    input: Payload,
    state: Option<Payload>,
    function: Option<WorkFn>,
    callback: Option<Callback>,
}

impl WorkItemBuilder {
    pub fn input<T>(mut self, input: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.input = Arc::new(input);
        self
    }

    pub fn state<T>(mut self, state: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.state = Some(Arc::new(state));
        self
    }

    /// Вызывается ровно один раз, после пробуждения ожидающих
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&WorkItem) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Собственная функция задачи, имеет приоритет над реестром
    pub fn function<F>(mut self, function: F) -> Self
    where
        F: Fn(&WorkItem, &WorkContext) -> Result<(), WorkError> + Send + Sync + 'static,
    {
        self.function = Some(Arc::new(function));
        self
    }

    pub fn build(self) -> WorkItem {
        WorkItem {
            inner: Arc::new(Inner {
                group: self.group,
                name: self.name,
                input: self.input,
                state: self.state,
                function: self.function,
                callback: Mutex::new(self.callback),
                slot: Mutex::new(Slot {
                    status: WorkStatus::Pending,
                    output: None,
                    error: None,
                    cancelled: false,
                }),
                done: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }
}


/// Контекст исполнения, передаётся рабочей функции.
///
/// Отмена действует только на текущее исполнение: поток и его флаг
/// работы не затрагиваются.
pub struct WorkContext {
    worker: WorkerId,
    token: CancellationToken,
}

impl WorkContext {
    pub(crate) fn new(worker: WorkerId) -> Self {
        Self {
            worker,
            token: CancellationToken::new(),
        }
    }

    #[inline]
    pub fn worker_id(&self) -> WorkerId {
        self.worker
    }

    /// Отменяет собственное исполнение; результат удобно вернуть как `Err`
    pub fn cancel_self(&self) -> WorkError {
        self.token.cancel();
        WorkError::cancelled()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Точка проверки отмены внутри рабочей функции
    pub fn checkpoint(&self) -> Result<(), WorkError> {
        if self.is_cancelled() {
            Err(WorkError::cancelled())
        } else {
            Ok(())
        }
    }
}


/// Дожидается всех задач, возвращает их исходы в том же порядке
pub async fn join_all<'a, I>(items: I) -> Vec<Result<(), WorkError>>
where
    I: IntoIterator<Item = &'a WorkItem>,
{
    let waits = items.into_iter().map(|item| async move {
        item.completed().await;
        item.outcome()
    });
    futures::future::join_all(waits).await
}
