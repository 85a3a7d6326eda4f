use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use storetree::concurrency::{StoreConcurrencyManager, TaskCategory};
use storetree::error::QueueError;
use storetree::task::{Priority, QueueConfig, StopOutcome, Task, TaskIdCounter};
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(5);

fn manager() -> StoreConcurrencyManager {
    let config = QueueConfig {
        poll_interval_ms: 20,
        grace_period_ms: 1000,
        force_period_ms: 200,
    };
    StoreConcurrencyManager::new(TaskIdCounter::new(), config)
}

/// Occupy a queue's worker until the returned sender fires
async fn hold(manager: &StoreConcurrencyManager, store_id: u64, category: TaskCategory) -> oneshot::Sender<()> {
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let (started_tx, started_rx) = oneshot::channel::<()>();
    manager
        .submit(
            store_id,
            category,
            Task::new("hold", async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok(())
            }),
        )
        .unwrap();
    started_rx.await.unwrap();
    release_tx
}

fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str, priority: Priority) -> Task {
    let log = Arc::clone(log);
    let entry = name.to_string();
    Task::from_fn(name, move || {
        log.lock().push(entry);
        Ok(())
    })
    .with_priority(priority)
}

#[tokio::test]
async fn pending_work_runs_by_priority_then_submission() {
    let manager = manager();
    let log = Arc::new(Mutex::new(Vec::new()));
    let release = hold(&manager, 1, TaskCategory::General).await;

    for (name, priority) in [
        ("low", Priority::Low),
        ("normal-1", Priority::Normal),
        ("urgent", Priority::Urgent),
        ("normal-2", Priority::Normal),
        ("high", Priority::High),
    ] {
        manager
            .submit(1, TaskCategory::General, recorder(&log, name, priority))
            .unwrap();
    }
    assert_eq!(manager.queue_size(1, TaskCategory::General), 5);

    release.send(()).unwrap();
    assert!(manager.wait_for_idle(1, WAIT).await);
    assert_eq!(
        *log.lock(),
        vec!["urgent", "high", "normal-1", "normal-2", "low"]
    );
    manager.stop_all_managers().await;
}

#[tokio::test]
async fn a_blocked_store_does_not_hold_up_others() {
    let manager = manager();
    let log = Arc::new(Mutex::new(Vec::new()));
    let release = hold(&manager, 1, TaskCategory::General).await;

    manager
        .submit(1, TaskCategory::General, recorder(&log, "store-1", Priority::Normal))
        .unwrap();
    manager
        .submit(2, TaskCategory::General, recorder(&log, "store-2", Priority::Normal))
        .unwrap();
    manager
        .submit(1, TaskCategory::Index, recorder(&log, "store-1-index", Priority::Normal))
        .unwrap();

    assert!(manager.wait_for_idle(2, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    {
        let log = log.lock();
        assert!(log.contains(&"store-2".to_string()));
        assert!(log.contains(&"store-1-index".to_string()));
        assert!(!log.contains(&"store-1".to_string()));
    }

    release.send(()).unwrap();
    assert!(manager.wait_for_idle(1, WAIT).await);
    assert!(log.lock().contains(&"store-1".to_string()));
    manager.stop_all_managers().await;
}

#[tokio::test]
async fn task_ids_are_unique_across_stores_and_categories() {
    let manager = manager();
    let mut ids = Vec::new();
    for store_id in 1..=3 {
        for category in TaskCategory::ALL {
            ids.push(manager.submit(store_id, category, Task::from_fn("noop", || Ok(()))).unwrap());
        }
    }
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), ids.len());
    assert_eq!(sorted, ids);
    assert_eq!(manager.ids().last_issued(), 9);
    assert_eq!(manager.store_ids(), vec![1, 2, 3]);
    manager.stop_all_managers().await;
}

#[tokio::test]
async fn stopping_one_store_leaves_the_rest_running() {
    let manager = manager();
    for store_id in [1, 2] {
        for category in TaskCategory::ALL {
            manager
                .submit(store_id, category, Task::from_fn("noop", || Ok(())))
                .unwrap();
        }
    }
    assert!(manager.wait_for_idle(1, WAIT).await);

    let outcomes = manager.stop_store(1).await;
    let categories: Vec<TaskCategory> = outcomes.iter().map(|(c, _)| *c).collect();
    assert_eq!(categories, TaskCategory::ALL.to_vec());
    assert!(outcomes.iter().all(|(_, o)| *o == StopOutcome::Graceful));

    let err = manager
        .submit(1, TaskCategory::Binary, Task::from_fn("late", || Ok(())))
        .unwrap_err();
    assert!(matches!(err, QueueError::SubmissionRejected { .. }));
    manager
        .submit(2, TaskCategory::Binary, Task::from_fn("still open", || Ok(())))
        .unwrap();

    let all = manager.stop_all_managers().await;
    assert_eq!(all.len(), 2);
    assert!(all[&1].iter().all(|(_, o)| *o == StopOutcome::AlreadyStopped));
    assert!(all[&2].iter().all(|(_, o)| *o == StopOutcome::Graceful));
}

#[tokio::test]
async fn stop_waits_for_the_running_task_within_grace() {
    let manager = manager();
    let log = Arc::new(Mutex::new(Vec::new()));
    let finished = Arc::clone(&log);
    manager
        .submit(
            7,
            TaskCategory::Binary,
            Task::new("slow write", async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                finished.lock().push("written".to_string());
                Ok(())
            }),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let outcomes = manager.stop_store(7).await;
    assert!(outcomes.iter().all(|(_, o)| *o == StopOutcome::Graceful));
    assert_eq!(*log.lock(), vec!["written".to_string()]);
}
