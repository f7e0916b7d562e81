//! 运行队列
//!
//! 单槽有界通道（容量 1）+ 单个串行 worker：同一时刻最多执行一个根运行，按提交顺序执行。
//! 出队时已取消的任务直接跳过；执行中被取消时丢弃其 future（子进程随之被杀）。
//! 任务失败只记录日志，worker 继续服务后续任务。

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::session::SessionError;
use crate::core::AgentError;

/// 任务 future（自行处理会话状态，只把结果交给 worker 记录）
pub type RunTask = Pin<Box<dyn Future<Output = Result<(), AgentError>> + Send>>;

/// 排队中的一次运行
pub struct RunJob {
    /// 日志标签（通常是会话 ID）
    pub label: String,
    pub token: CancellationToken,
    pub task: RunTask,
}

impl RunJob {
    pub fn new(label: impl Into<String>, token: CancellationToken, task: RunTask) -> Self {
        Self {
            label: label.into(),
            token,
            task,
        }
    }
}

/// 提交端（可克隆）
#[derive(Clone)]
pub struct RunQueue {
    tx: mpsc::Sender<RunJob>,
}

impl RunQueue {
    /// 创建队列及其 worker；worker 需由调用方 spawn
    pub fn new() -> (Self, RunWorker) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, RunWorker { rx })
    }

    /// 入队；槽位被占用时等待
    pub async fn submit(&self, job: RunJob) -> Result<(), SessionError> {
        tracing::debug!(job = %job.label, "Queueing run");
        self.tx.send(job).await.map_err(|_| SessionError::QueueClosed)
    }

    /// 入队但不等待：槽位被占用时由后台任务排队，排队期间被取消则放弃
    ///
    /// 需在 tokio 运行时内调用。后台排队者按到达顺序获得槽位。
    pub fn enqueue(&self, job: RunJob) -> Result<(), SessionError> {
        let job = match self.tx.try_send(job) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(SessionError::QueueClosed),
            Err(TrySendError::Full(job)) => job,
        };
        tracing::debug!(job = %job.label, "Run queue slot taken, waiting in background");
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let token = job.token.clone();
            let label = job.label.clone();
            tokio::select! {
                _ = token.cancelled() => tracing::info!(job = %label, "Run cancelled while waiting for the queue"),
                res = tx.send(job) => {
                    if res.is_err() {
                        tracing::warn!(job = %label, "Run queue closed");
                    }
                }
            }
        });
        Ok(())
    }
}

pub struct RunWorker {
    rx: mpsc::Receiver<RunJob>,
}

impl RunWorker {
    /// 串行执行，直到所有提交端被丢弃
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            if job.token.is_cancelled() {
                tracing::info!(job = %job.label, "Skipping cancelled run");
                continue;
            }
            tracing::info!(job = %job.label, "Run started");
            let outcome = tokio::select! {
                biased;
                _ = job.token.cancelled() => None,
                res = job.task => Some(res),
            };
            match outcome {
                Some(Ok(())) => tracing::info!(job = %job.label, "Run finished"),
                Some(Err(e)) => tracing::error!(job = %job.label, error = %e, "Run failed"),
                None => tracing::info!(job = %job.label, "Run cancelled"),
            }
        }
        tracing::debug!("Run queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_runs_in_order_one_at_a_time() {
        let (queue, worker) = RunQueue::new();
        let worker = tokio::spawn(worker.run());

        let order = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let order = Arc::clone(&order);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let task: RunTask = Box::pin(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                order.lock().unwrap().push(i);
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
            queue
                .submit(RunJob::new(format!("job{i}"), CancellationToken::new(), task))
                .await
                .unwrap();
        }
        drop(queue);
        worker.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_job_is_skipped_and_failure_does_not_stop_worker() {
        let (queue, worker) = RunQueue::new();
        let worker = tokio::spawn(worker.run());

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let first: RunTask = Box::pin(async move {
            let _ = release_rx.await;
            Err(AgentError::Llm(LlmError::Api("boom".into())))
        });
        queue
            .submit(RunJob::new("first", CancellationToken::new(), first))
            .await
            .unwrap();

        let skipped_ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&skipped_ran);
        let token = CancellationToken::new();
        let second: RunTask = Box::pin(async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        queue
            .submit(RunJob::new("second", token.clone(), second))
            .await
            .unwrap();
        token.cancel();

        let (done_tx, done_rx) = oneshot::channel::<()>();
        let third: RunTask = Box::pin(async move {
            let _ = done_tx.send(());
            Ok(())
        });
        let submitter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .submit(RunJob::new("third", CancellationToken::new(), third))
                    .await
            })
        };

        release_tx.send(()).unwrap();
        done_rx.await.unwrap();
        submitter.await.unwrap().unwrap();
        assert_eq!(skipped_ran.load(Ordering::SeqCst), 0);

        drop(queue);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_while_running_drops_task() {
        let (queue, worker) = RunQueue::new();
        let worker = tokio::spawn(worker.run());

        let token = CancellationToken::new();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let hang: RunTask = Box::pin(async move {
            let _ = started_tx.send(());
            std::future::pending::<()>().await;
            Ok(())
        });
        queue.submit(RunJob::new("hang", token.clone(), hang)).await.unwrap();
        started_rx.await.unwrap();
        token.cancel();

        drop(queue);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_does_not_wait_for_slot() {
        let (queue, worker) = RunQueue::new();
        let worker = tokio::spawn(worker.run());

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let busy: RunTask = Box::pin(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok(())
        });
        queue.enqueue(RunJob::new("busy", CancellationToken::new(), busy)).unwrap();
        started_rx.await.unwrap();

        // 槽位被占：一个排队，一个在后台等待且随后被取消
        let noop = || -> RunTask { Box::pin(async { Ok(()) }) };
        queue.enqueue(RunJob::new("queued", CancellationToken::new(), noop())).unwrap();
        let abandoned = CancellationToken::new();
        queue.enqueue(RunJob::new("abandoned", abandoned.clone(), noop())).unwrap();
        abandoned.cancel();

        let (done_tx, done_rx) = oneshot::channel::<()>();
        let last: RunTask = Box::pin(async move {
            let _ = done_tx.send(());
            Ok(())
        });
        queue.enqueue(RunJob::new("last", CancellationToken::new(), last)).unwrap();

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .unwrap()
            .unwrap();

        drop(queue);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }
}
