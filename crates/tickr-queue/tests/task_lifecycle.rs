// End-to-end producer → worker → poller flow over the SQLite cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tickr_queue::{
    HandlerRegistry, QueueError, SharedCache, SqliteCache, TaskArgs, TaskContext, TaskHandler, TaskQueue,
    TaskStatus, Worker,
};

struct RefillTrainerQueue;

#[async_trait]
impl TaskHandler for RefillTrainerQueue {
    async fn handle(&self, ctx: &TaskContext, args: &TaskArgs) -> anyhow::Result<serde_json::Value> {
        let setup_id = args
            .get("setupId")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow::anyhow!("setupId is required"))?;
        ctx.info(&format!("refilling setup {setup_id}")).await;
        Ok(serde_json::json!({ "setupId": setup_id, "added": 10 }))
    }
}

struct Explodes;

#[async_trait]
impl TaskHandler for Explodes {
    async fn handle(&self, _ctx: &TaskContext, _args: &TaskArgs) -> anyhow::Result<serde_json::Value> {
        panic!("boom");
    }
}

fn setup() -> (TaskQueue, Worker) {
    let cache: Arc<dyn SharedCache> = Arc::new(SqliteCache::open_in_memory().unwrap());
    let queue = TaskQueue::new(cache);
    let mut handlers = HandlerRegistry::new();
    handlers.register("refillTrainerQueue", Arc::new(RefillTrainerQueue)).unwrap();
    handlers.register("explodes", Arc::new(Explodes)).unwrap();
    let worker = Worker::new(queue.clone(), Arc::new(handlers));
    (queue, worker)
}

/// SQLite cache whose record writes start failing once `frozen` is set.
struct FreezableCache {
    inner: SqliteCache,
    frozen: AtomicBool,
}

#[async_trait]
impl SharedCache for FreezableCache {
    fn name(&self) -> &str {
        "freezable"
    }

    async fn get(&self, key: &str) -> tickr_queue::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> tickr_queue::Result<()> {
        if self.frozen.load(Ordering::SeqCst) {
            let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
            return Err(QueueError::Serialization(err));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> tickr_queue::Result<()> {
        self.inner.delete(key).await
    }

    async fn set_and_push(&self, key: &str, value: &str, list: &str, item: &str) -> tickr_queue::Result<()> {
        self.inner.set_and_push(key, value, list, item).await
    }

    async fn pop_front(&self, list: &str) -> tickr_queue::Result<Option<String>> {
        self.inner.pop_front(list).await
    }

    async fn list(&self, list: &str) -> tickr_queue::Result<Vec<String>> {
        self.inner.list(list).await
    }
}

fn setup_args(id: i64) -> TaskArgs {
    let mut args = TaskArgs::new();
    args.insert("setupId".into(), serde_json::json!(id));
    args
}

#[tokio::test]
async fn enqueue_then_worker_completes_with_result() {
    let (queue, worker) = setup();
    let id = queue.enqueue("refillTrainerQueue", setup_args(5)).await.unwrap();
    assert_eq!(queue.poll(&id).await.unwrap().status, TaskStatus::Queued);

    let status = worker.process_next().await.unwrap();
    assert_eq!(status, Some(TaskStatus::Completed));

    let task = queue.poll(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.unwrap()["added"], 10);
    assert!(task.error.is_none());
    assert_eq!(task.logs.len(), 1);
    assert!(task.started_at.unwrap() <= task.ended_at.unwrap());
}

#[tokio::test]
async fn handler_error_is_recorded_as_failed() {
    let (queue, worker) = setup();
    let id = queue.enqueue("refillTrainerQueue", TaskArgs::new()).await.unwrap();
    worker.process_next().await.unwrap();

    let task = queue.poll(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("setupId is required"));
    assert!(task.result.is_none());
}

#[tokio::test]
async fn unknown_function_fails_instead_of_dropping() {
    let (queue, worker) = setup();
    let id = queue.enqueue("noSuchThing", TaskArgs::new()).await.unwrap();
    assert_eq!(worker.process_next().await.unwrap(), Some(TaskStatus::Failed));
    let task = queue.poll(&id).await.unwrap();
    assert!(task.error.unwrap().contains("noSuchThing"));
}

#[tokio::test]
async fn panicking_handler_leaves_failed_record() {
    let (queue, worker) = setup();
    let id = queue.enqueue("explodes", TaskArgs::new()).await.unwrap();
    assert_eq!(worker.process_next().await.unwrap(), Some(TaskStatus::Failed));
    let task = queue.poll(&id).await.unwrap();
    assert!(task.error.unwrap().contains("panicked"));
}

#[tokio::test]
async fn cancelled_task_is_skipped_by_worker() {
    let (queue, worker) = setup();
    let id = queue.enqueue("refillTrainerQueue", setup_args(1)).await.unwrap();
    queue.cancel(&id).await.unwrap();

    assert_eq!(worker.process_next().await.unwrap(), Some(TaskStatus::Cancelled));
    let task = queue.poll(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.started_at.is_none());
}

#[tokio::test]
async fn empty_queue_processes_nothing() {
    let (_queue, worker) = setup();
    assert_eq!(worker.process_next().await.unwrap(), None);
}

#[tokio::test]
async fn run_loop_stops_on_shutdown() {
    let (queue, worker) = setup();
    let worker = worker.with_poll_interval(std::time::Duration::from_millis(10));
    let id = queue.enqueue("refillTrainerQueue", setup_args(2)).await.unwrap();

    let shutdown = tokio_util::sync::CancellationToken::new();
    let stop = shutdown.clone();
    let handle = tokio::spawn(async move { worker.run(stop).await });

    for _ in 0..100 {
        if queue.poll(&id).await.unwrap().status.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    handle.await.unwrap();
    assert_eq!(queue.poll(&id).await.unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn start_failure_after_pop_surfaces_the_error() {
    let cache = Arc::new(FreezableCache {
        inner: SqliteCache::open_in_memory().unwrap(),
        frozen: AtomicBool::new(false),
    });
    let queue = TaskQueue::new(cache.clone());
    let mut handlers = HandlerRegistry::new();
    handlers.register("refillTrainerQueue", Arc::new(RefillTrainerQueue)).unwrap();
    let worker = Worker::new(queue.clone(), Arc::new(handlers));

    let id = queue.enqueue("refillTrainerQueue", setup_args(3)).await.unwrap();
    cache.frozen.store(true, Ordering::SeqCst);

    let err = worker.process_next().await.unwrap_err();
    assert!(matches!(err, QueueError::Serialization(_)));
    // Envelope consumed, record untouched: only the log line can recover it.
    assert!(queue.pending().await.unwrap().is_empty());
    let task = queue.poll(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.started_at.is_none());
}
