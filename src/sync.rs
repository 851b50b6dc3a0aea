use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::sync::{Mutex, MutexGuard};


/// Захват мьютекса с восстановлением после паники другого потока
#[inline]
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}


/// Личный сигнал пробуждения потока.
///
/// Одноместный канал: сигнал, поданный без ожидающего, остаётся висеть
/// ровно для одного следующего `wait`. Повторные сигналы схлопываются.
pub(crate) struct WakeSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl WakeSignal {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(1);
        Self { tx, rx }
    }

    /// Не блокирует
    pub fn signal(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            // оба конца живут в одной структуре
            Err(TrySendError::Disconnected(())) => unreachable!("wake signal receiver dropped"),
        }
    }

    /// Блокирует до сигнала
    pub fn wait(&self) {
        // отправитель живёт рядом, канал не может отключиться
        let _ = self.rx.recv();
    }

    /// `true`, если сигнал пришёл до истечения таймаута
    #[cfg(test)]
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }
}
