#[cfg(test)]
mod tests {
    use leader_follower::{
        join_all,
        Config,
        LeaderFollowerPool,
        PoolError,
        Priority,
        QueueError,
        Registry,
        WorkError,
        WorkErrorKind,
        WorkItem,
    };
    use crossbeam::channel::{self, Receiver, Sender};
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    const WAIT: Duration = Duration::from_secs(5);

    /// Задача, занимающая поток до сигнала. Возвращает (задача, отпустить, началась)
    fn gate() -> (WorkItem, Sender<()>, Receiver<()>) {
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let (started_tx, started_rx) = channel::bounded::<()>(1);
        let item = WorkItem::builder("test", "gate")
            .function(move |_, _| {
                let _ = started_tx.send(());
                let _ = release_rx.recv();
                Ok(())
            })
            .build();
        (item, release_tx, started_rx)
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> WorkItem {
        let log = log.clone();
        WorkItem::builder("test", label)
            .function(move |_, _| {
                log.lock().unwrap().push(label);
                Ok(())
            })
            .build()
    }

    fn single_thread_pool() -> LeaderFollowerPool {
        LeaderFollowerPool::create(1, 1, 0, Registry::new()).unwrap()
    }

    #[test]
    fn test_invalid_arguments() {
        println!("\n=== TEST: Неверные аргументы пула ===");
        assert!(matches!(
            LeaderFollowerPool::create(2, 4, 60, Registry::new()),
            Err(PoolError::MaxBelowMin { max: 2, min: 4 })
        ));
        assert!(matches!(
            LeaderFollowerPool::create(2, 0, 60, Registry::new()),
            Err(PoolError::MinBelowOne)
        ));
        assert!(matches!(
            LeaderFollowerPool::create(2, 1, -5, Registry::new()),
            Err(PoolError::NegativeIdleTimeout(-5))
        ));
        println!("  ✓ Ошибки аргументов возвращаются сразу");
    }

    #[test]
    fn test_priority_order() {
        println!("\n=== TEST: Порядок исполнения по приоритету ===");
        let pool = single_thread_pool();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (blocker, release, started) = gate();
        pool.submit_with_priority(&blocker, Priority::Highest).unwrap();
        started.recv_timeout(WAIT).unwrap();

        let items = [
            (recorder(&log, "Lowest"), Priority::Lowest),
            (recorder(&log, "BelowNormal"), Priority::BelowNormal),
            (recorder(&log, "Normal"), Priority::Normal),
            (recorder(&log, "AboveNormal"), Priority::AboveNormal),
            (recorder(&log, "Highest"), Priority::Highest),
        ];
        for (item, priority) in &items {
            pool.submit_with_priority(item, *priority).unwrap();
        }
        drop(release);

        for (item, _) in &items {
            assert!(item.wait_timeout(WAIT), "Задача должна завершиться");
        }
        assert_eq!(
            *log.lock().unwrap(),
            vec!["Highest", "AboveNormal", "Normal", "BelowNormal", "Lowest"]
        );
        println!("  ✓ Порядок: {:?}", log.lock().unwrap());
        pool.shutdown();
    }

    #[test]
    fn test_fifo_within_level() {
        println!("\n=== TEST: FIFO внутри уровня ===");
        let pool = single_thread_pool();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (blocker, release, started) = gate();
        pool.submit(&blocker).unwrap();
        started.recv_timeout(WAIT).unwrap();

        let labels = ["n1", "h1", "n2", "h2", "n3"];
        let items: Vec<_> = labels.iter().map(|&label| recorder(&log, label)).collect();
        for (item, label) in items.iter().zip(labels) {
            let priority = if label.starts_with('h') { Priority::Highest } else { Priority::Normal };
            pool.submit_with_priority(item, priority).unwrap();
        }
        drop(release);

        for item in &items {
            assert!(item.wait_timeout(WAIT));
        }
        assert_eq!(*log.lock().unwrap(), vec!["h1", "h2", "n1", "n2", "n3"]);
        println!("  ✓ Порядок сохранён");
        pool.shutdown();
    }

    #[test]
    fn test_withdraw_and_reprioritize() {
        println!("\n=== TEST: Отзыв и смена приоритета ===");
        let pool = single_thread_pool();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (blocker, release, started) = gate();
        pool.submit(&blocker).unwrap();
        started.recv_timeout(WAIT).unwrap();

        let a = recorder(&log, "a");
        let b = recorder(&log, "b");
        let c = recorder(&log, "c");
        let a_handle = pool.submit_with_priority(&a, Priority::Lowest).unwrap();
        let b_handle = pool.submit_with_priority(&b, Priority::Lowest).unwrap();
        pool.submit_with_priority(&c, Priority::Normal).unwrap();

        let withdrawn = pool.withdraw(b_handle).unwrap();
        assert!(withdrawn.ptr_eq(&b));
        assert_eq!(pool.withdraw(b_handle).unwrap_err(), QueueError::StaleHandle);
        assert_eq!(pool.reprioritize(b_handle, Priority::Highest), Err(QueueError::StaleHandle));
        pool.reprioritize(a_handle, Priority::Highest).unwrap();
        assert_eq!(pool.metrics().queued_items, 2);
        drop(release);

        assert!(a.wait_timeout(WAIT));
        assert!(c.wait_timeout(WAIT));
        assert!(!b.wait_timeout(Duration::from_millis(100)), "Отозванная задача не исполняется");
        assert_eq!(*log.lock().unwrap(), vec!["a", "c"]);
        println!("  ✓ Отозванная задача не исполнилась, a обогнала c");
        pool.shutdown();
    }

    #[test]
    fn test_invalid_priority_rejected() {
        println!("\n=== TEST: Приоритет Invalid ===");
        let pool = single_thread_pool();
        let item = WorkItem::new("test", "noop", ());
        assert_eq!(
            pool.submit_with_priority(&item, Priority::Invalid).unwrap_err(),
            QueueError::InvalidPriority
        );
        assert_eq!(pool.metrics().submitted, 0);
        println!("  ✓ Задача с Invalid не попадает в очередь");
        pool.shutdown();
    }

    #[test]
    fn test_registry_dispatch_and_output() {
        println!("\n=== TEST: Вызов функции из реестра ===");
        let registry = Registry::new().with("math", "square", |item, _| {
            let x = *item.input::<u64>().ok_or_else(|| WorkError::invalid_input("u64 expected"))?;
            item.set_output(x * x);
            Ok(())
        });
        let pool = LeaderFollowerPool::new(Config::default().with_threads(2, 4), registry).unwrap();

        let items: Vec<_> = (1..=10u64).map(|x| WorkItem::new("math", "square", x)).collect();
        for item in &items {
            pool.submit(item).unwrap();
        }
        for (x, item) in (1..=10u64).zip(&items) {
            item.wait();
            assert!(item.outcome().is_ok());
            assert_eq!(*item.output::<u64>().unwrap(), x * x);
        }
        println!("  ✓ 10 результатов получены");
        pool.shutdown();
    }

    #[test]
    fn test_error_and_panic_capture() {
        println!("\n=== TEST: Ошибки и паники в задачах ===");
        let registry = Registry::new()
            .with("bad", "fail", |_, _| Err(WorkError::failed("boom")))
            .with("bad", "panic", |_, _| panic!("work function exploded"))
            .with("good", "ok", |_, _| Ok(()));
        let pool = LeaderFollowerPool::create(2, 1, 0, registry).unwrap();

        let failing = WorkItem::new("bad", "fail", ());
        let panicking = WorkItem::new("bad", "panic", ());
        let missing = WorkItem::new("bad", "missing", ());
        let wrong_input = WorkItem::builder("bad", "input")
            .function(|item, _| {
                item.input::<String>()
                    .ok_or_else(|| WorkError::invalid_input("string expected"))
                    .map(|_| ())
            })
            .input(7u8)
            .build();
        for item in [&failing, &panicking, &missing, &wrong_input] {
            pool.submit(item).unwrap();
        }
        for item in [&failing, &panicking, &missing, &wrong_input] {
            assert!(item.wait_timeout(WAIT), "Задача завершается даже при ошибке");
        }

        assert_eq!(failing.error().unwrap().kind(), WorkErrorKind::Failed);
        assert_eq!(failing.error().unwrap().message(), "boom");
        let panic_error = panicking.error().unwrap();
        assert_eq!(panic_error.kind(), WorkErrorKind::Panicked);
        assert!(panic_error.message().contains("work function exploded"));
        assert_eq!(missing.error().unwrap().kind(), WorkErrorKind::FunctionNotFound);
        assert_eq!(wrong_input.error().unwrap().kind(), WorkErrorKind::InvalidInput);
        println!("  ✓ Ошибки записаны в задачи");

        let after = WorkItem::new("good", "ok", ());
        pool.submit(&after).unwrap();
        assert!(after.wait_timeout(WAIT));
        assert!(after.outcome().is_ok());

        let metrics = pool.metrics();
        assert_eq!(metrics.failed, 4);
        assert!(metrics.thread_count >= 1, "Потоки переживают ошибки");
        println!("  ✓ Пул продолжает работать, потоков: {}", metrics.thread_count);
        pool.shutdown();
    }

    #[test]
    fn test_self_cancellation() {
        println!("\n=== TEST: Самоотмена задачи ===");
        let registry = Registry::new()
            .with("features", "abort", |_, ctx| {
                ctx.checkpoint()?;
                Err(ctx.cancel_self())
            })
            .with("features", "ok", |item, _| {
                item.set_output("done");
                Ok(())
            });
        let pool = LeaderFollowerPool::create(1, 1, 0, registry).unwrap();

        let abort = WorkItem::new("features", "abort", ());
        let later: Vec<_> = (0..3).map(|_| WorkItem::new("features", "ok", ())).collect();
        pool.submit_with_priority(&abort, Priority::Highest).unwrap();
        for item in &later {
            pool.submit(item).unwrap();
        }

        assert!(abort.wait_timeout(WAIT));
        assert!(abort.was_cancelled());
        assert!(abort.error().is_none(), "Отмена не выглядит как ошибка");
        for item in &later {
            assert!(item.wait_timeout(WAIT), "Поток продолжает брать задачи");
            assert_eq!(*item.output::<&'static str>().unwrap(), "done");
        }

        let metrics = pool.metrics();
        assert_eq!(metrics.cancelled, 1);
        assert_eq!(metrics.failed, 0);
        assert_eq!(metrics.thread_count, 1);
        println!("  ✓ Самоотмена затронула только свою задачу");
        pool.shutdown();
    }

    #[test]
    fn test_manual_complete_and_callback() {
        println!("\n=== TEST: Завершение из функции и callback ===");
        let pool = LeaderFollowerPool::create(2, 1, 0, Registry::new()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let (called_tx, called_rx) = channel::bounded::<()>(1);

        let item = {
            let calls = calls.clone();
            WorkItem::builder("test", "manual")
                .function(|item, _| {
                    item.set_output(1u32);
                    item.complete();
                    Ok(())
                })
                .callback(move |item| {
                    assert!(item.is_completed());
                    calls.fetch_add(1, Ordering::SeqCst);
                    let _ = called_tx.send(());
                })
                .build()
        };
        pool.submit(&item).unwrap();
        assert!(item.wait_timeout(WAIT));
        // callback вызывается после пробуждения ожидающих
        called_rx.recv_timeout(WAIT).unwrap();
        // после единственного вызова callback отброшен вместе с отправителем
        assert!(called_rx.recv_timeout(WAIT).is_err());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*item.output::<u32>().unwrap(), 1);
        println!("  ✓ Задача завершена один раз, callback вызван один раз");
        pool.shutdown();
    }

    #[test]
    fn test_complete_after_error_is_not_repeated() {
        println!("\n=== TEST: Ошибка после ручного завершения ===");
        let pool = LeaderFollowerPool::create(1, 1, 0, Registry::new()).unwrap();
        let item = WorkItem::builder("test", "late_error")
            .function(|item, _| {
                item.complete();
                Err(WorkError::failed("too late"))
            })
            .build();
        pool.submit(&item).unwrap();
        assert!(item.wait_timeout(WAIT));
        assert!(item.error().is_none(), "Завершённая задача больше не меняется");

        let next = WorkItem::builder("test", "next").function(|_, _| Ok(())).build();
        pool.submit(&next).unwrap();
        assert!(next.wait_timeout(WAIT));
        println!("  ✓ Поздняя ошибка отброшена, пул работает");
        pool.shutdown();
    }

    #[test]
    fn test_callback_panic_after_manual_complete() {
        println!("\n=== TEST: Паника callback после ручного завершения ===");
        let pool = single_thread_pool();

        let item = WorkItem::builder("test", "manual")
            .function(|item, _| {
                item.set_output(5u32);
                item.complete();
                Ok(())
            })
            .callback(|_| panic!("callback exploded"))
            .build();
        let next = WorkItem::builder("test", "next").function(|_, _| Ok(())).build();
        pool.submit(&item).unwrap();
        pool.submit(&next).unwrap();

        assert!(item.wait_timeout(WAIT));
        // один поток: к завершению next учёт первой задачи уже записан
        assert!(next.wait_timeout(WAIT));
        assert!(item.error().is_none());
        assert_eq!(*item.output::<u32>().unwrap(), 5);

        let metrics = pool.metrics();
        assert_eq!(metrics.failed, 0, "Паника callback не делает работу неудачной");
        assert_eq!(metrics.completed, 2);
        println!("  ✓ Задача учтена как выполненная");
        pool.shutdown();
    }

    #[test]
    fn test_thread_bounds() {
        println!("\n=== TEST: Число потоков в границах [min, max] ===");
        let pool = LeaderFollowerPool::create(4, 2, 0, Registry::new()).unwrap();
        assert_eq!(pool.thread_count(), 2);

        let items: Vec<_> = (0..32)
            .map(|_| {
                WorkItem::builder("test", "sleep")
                    .function(|_, _| {
                        std::thread::sleep(Duration::from_millis(20));
                        Ok(())
                    })
                    .build()
            })
            .collect();
        for item in &items {
            pool.submit(item).unwrap();
            let count = pool.thread_count();
            assert!((2..=4).contains(&count), "Потоков: {}", count);
        }
        for item in &items {
            assert!(item.wait_timeout(WAIT));
            let count = pool.thread_count();
            assert!((2..=4).contains(&count), "Потоков: {}", count);
        }
        println!("  ✓ Потоков в конце: {}", pool.thread_count());
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_async_join_all() {
        println!("\n=== TEST: Асинхронное ожидание задач ===");
        let registry = Registry::new().with("math", "inc", |item, _| {
            let x = *item.input::<i64>().ok_or_else(|| WorkError::invalid_input("i64 expected"))?;
            if x % 5 == 0 {
                return Err(WorkError::failed(format!("{} is divisible by 5", x)));
            }
            item.set_output(x + 1);
            Ok(())
        });
        let pool = LeaderFollowerPool::create(4, 2, 0, registry).unwrap();

        let items: Vec<_> = (1..=20i64).map(|x| WorkItem::new("math", "inc", x)).collect();
        for item in &items {
            pool.submit(item).unwrap();
        }
        let outcomes = join_all(&items).await;

        assert_eq!(outcomes.len(), 20);
        let failed = outcomes.iter().filter(|outcome| outcome.is_err()).count();
        assert_eq!(failed, 4);
        assert_eq!(*items[0].output::<i64>().unwrap(), 2);
        assert!(items[4].await_timeout(Duration::from_millis(10)).await.is_ok());
        println!("  ✓ Успешно: {}, с ошибкой: {}", outcomes.len() - failed, failed);

        tokio::task::spawn_blocking(move || pool.shutdown()).await.unwrap();
    }
}
