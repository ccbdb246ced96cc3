/// 固定サイズのバッチで非同期タスクを発行し、バッチ間に待機を挟む。
use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;

use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchPacer {
    batch_size: NonZeroUsize,
    inter_batch_delay: Duration,
}

impl BatchPacer {
    pub(crate) fn new(batch_size: NonZeroUsize, inter_batch_delay: Duration) -> Self {
        Self {
            batch_size,
            inter_batch_delay,
        }
    }

    /// `total` 個のタスクを実行し、呼び出し順（インデックス順）に結果を返す。
    ///
    /// バッチ内のタスクは並行に走り、全タスクが完了してから次のバッチへ進む。
    /// パニックしたタスクは `None` として扱う。
    pub(crate) async fn run<T, F, Fut>(&self, total: usize, task: F) -> Vec<Option<T>>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Option<T>> + Send + 'static,
        T: Send + 'static,
    {
        let batch_size = self.batch_size.get();
        let batch_count = total.div_ceil(batch_size);
        let mut results = Vec::with_capacity(total);

        for batch_index in 0..batch_count {
            if batch_index > 0 && !self.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.inter_batch_delay).await;
            }

            let start = batch_index * batch_size;
            let end = (start + batch_size).min(total);
            debug!(batch = batch_index + 1, batch_count, start, end, "dispatching batch");

            let handles: Vec<_> = (start..end).map(|index| tokio::spawn(task(index))).collect();
            for (offset, joined) in futures::future::join_all(handles)
                .await
                .into_iter()
                .enumerate()
            {
                match joined {
                    Ok(outcome) => results.push(outcome),
                    Err(join_error) => {
                        let index = start + offset;
                        match join_error.try_into_panic() {
                            Ok(payload) => {
                                let panic_message = payload
                                    .downcast_ref::<&str>()
                                    .map(|s| (*s).to_string())
                                    .or_else(|| payload.downcast_ref::<String>().cloned())
                                    .unwrap_or_else(|| "unknown panic payload".to_string());
                                error!(index, panic_message = %panic_message, "batch task panicked");
                            }
                            Err(join_error) => {
                                warn!(index, error = ?join_error, "batch task was cancelled");
                            }
                        }
                        results.push(None);
                    }
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::Instant;

    use super::*;

    fn pacer(batch_size: usize, delay_ms: u64) -> BatchPacer {
        BatchPacer::new(
            NonZeroUsize::new(batch_size).expect("non-zero"),
            Duration::from_millis(delay_ms),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_invocation_order_despite_completion_order() {
        let results = pacer(5, 0)
            .run(7, |index| async move {
                let wait = 50 - u64::try_from(index).expect("small index") * 5;
                tokio::time::sleep(Duration::from_millis(wait)).await;
                Some(index)
            })
            .await;
        assert_eq!(results, (0..7).map(Some).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_batches_only() {
        let started = Instant::now();
        let results = pacer(5, 1000).run(20, |index| async move { Some(index) }).await;
        assert_eq!(results.len(), 20);
        // four batches -> three gaps
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn bounds_concurrency_to_batch_size() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let results = pacer(3, 10)
            .run(10, |_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Some(())
                }
            })
            .await;
        assert_eq!(results.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn panicking_task_becomes_none() {
        let results = pacer(2, 0)
            .run(3, |index| async move {
                assert!(index != 1, "boom");
                Some(index)
            })
            .await;
        assert_eq!(results, vec![Some(0), None, Some(2)]);
    }
}
