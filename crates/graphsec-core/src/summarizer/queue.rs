//! Work queue shared by the summarizer workers.
//!
//! Items wait until their `not_before` instant, so a retried item backs off
//! without holding a worker. The queue is drained when it is empty and no
//! worker holds an item.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One queued unit of work.
#[derive(Debug, Clone)]
pub struct Work<T> {
    pub item: T,
    /// Failed attempts so far.
    pub retries: u32,
    pub not_before: Instant,
}

struct State<T> {
    items: VecDeque<Work<T>>,
    in_flight: usize,
}

pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T> WorkQueue<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        let now = Instant::now();
        let items = items
            .into_iter()
            .map(|item| Work {
                item,
                retries: 0,
                not_before: now,
            })
            .collect();
        Self {
            state: Mutex::new(State {
                items,
                in_flight: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Items waiting plus items held by workers.
    pub fn remaining(&self) -> usize {
        let state = self.state.lock();
        state.items.len() + state.in_flight
    }

    /// Next ready item, or `None` once drained or cancelled.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<Work<T>> {
        loop {
            let notified = self.notify.notified();
            let wake_at = {
                let mut state = self.state.lock();
                let now = Instant::now();
                if let Some(pos) = state.items.iter().position(|w| w.not_before <= now) {
                    let work = state.items.remove(pos)?;
                    state.in_flight += 1;
                    return Some(work);
                }
                if state.items.is_empty() && state.in_flight == 0 {
                    return None;
                }
                state.items.iter().map(|w| w.not_before).min()
            };

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = notified => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    /// The held item is finished for good.
    pub fn done(&self) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Put a held item back, ready at `not_before`.
    pub fn requeue(&self, work: Work<T>) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.items.push_back(work);
        }
        self.notify.notify_waiters();
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_drains_in_order() {
        let queue = WorkQueue::new(vec![1, 2, 3]);
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        while let Some(work) = queue.next(&cancel).await {
            seen.push(work.item);
            queue.done();
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(queue.remaining(), 0);
    }

    #[tokio::test]
    async fn test_requeued_item_waits_for_backoff() {
        let queue = WorkQueue::new(vec!["a"]);
        let cancel = CancellationToken::new();
        let mut work = queue.next(&cancel).await.unwrap();
        work.retries += 1;
        work.not_before = Instant::now() + Duration::from_millis(20);
        let started = Instant::now();
        queue.requeue(work);

        let again = queue.next(&cancel).await.unwrap();
        assert_eq!(again.retries, 1);
        assert!(started.elapsed() >= Duration::from_millis(20));
        queue.done();
        assert!(queue.next(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_idle_worker_waits_for_in_flight() {
        let queue = Arc::new(WorkQueue::new(vec![7]));
        let cancel = CancellationToken::new();
        let held = queue.next(&cancel).await.unwrap();

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.next(&cancel).await.map(|w| w.item) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.requeue(held);

        assert_eq!(waiter.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_cancel_stops_waiting() {
        let queue = WorkQueue::new(vec![1]);
        let cancel = CancellationToken::new();
        let _held = queue.next(&cancel).await.unwrap();
        cancel.cancel();
        assert!(queue.next(&cancel).await.is_none());
    }
}
