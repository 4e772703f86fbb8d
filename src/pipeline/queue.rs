use crate::models::WorkItem;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// Pending items shared by all workers. `dequeue` pops under the lock, so
/// every item goes to exactly one worker.
pub struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
    total: usize,
}

impl WorkQueue {
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self {
            total: items.len(),
            items: Mutex::new(items.into()),
        }
    }

    pub async fn dequeue(&self) -> Option<WorkItem> {
        self.items.lock().await.pop_front()
    }

    /// Removes and returns everything still queued.
    pub async fn drain(&self) -> Vec<WorkItem> {
        self.items.lock().await.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Size at construction, for progress display.
    pub fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let q = WorkQueue::new(vec![WorkItem::new("1101", ""), WorkItem::new("2330", "")]);
        assert_eq!(q.total(), 2);
        assert_eq!(q.dequeue().await.unwrap().id, "1101");
        assert_eq!(q.len().await, 1);
        assert_eq!(q.dequeue().await.unwrap().id, "2330");
        assert!(q.dequeue().await.is_none());
        assert!(q.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_item_dequeued_exactly_once() {
        let n = 500;
        let m = 8;
        let items: Vec<WorkItem> = (0..n).map(|i| WorkItem::new(format!("{:04}", i), "")).collect();
        let q = Arc::new(WorkQueue::new(items));

        let mut handles = Vec::new();
        for w in 0..m {
            let q = Arc::clone(&q);
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = q.dequeue().await {
                    seen.push(item.id);
                    if w % 2 == 0 {
                        tokio::time::sleep(Duration::from_micros(50)).await;
                    } else {
                        tokio::task::yield_now().await;
                    }
                }
                seen
            }));
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for h in handles {
            for id in h.await.unwrap() {
                *counts.entry(id).or_default() += 1;
            }
        }
        assert_eq!(counts.len(), n);
        assert!(counts.values().all(|c| *c == 1));
    }

    #[tokio::test]
    async fn test_drain_empties_queue() {
        let q = WorkQueue::new(vec![WorkItem::new("1", ""), WorkItem::new("2", "")]);
        q.dequeue().await;
        let rest = q.drain().await;
        assert_eq!(rest.len(), 1);
        assert!(q.is_empty().await);
    }
}
