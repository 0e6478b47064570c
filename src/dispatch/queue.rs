//! FIFO work queues keyed by simulation configuration.

use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;

use super::work_item::WorkItem;

/// Queued work items, one FIFO per capability key.
#[derive(Debug, Default)]
pub struct CapabilityQueue {
    queues: Mutex<HashMap<String, VecDeque<WorkItem>>>,
}

impl CapabilityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail of the item's capability queue.
    pub async fn push_back(&self, item: WorkItem) {
        tracing::trace!(item_id = %item.item_id(), key = %item.capability_key(), "Queued work item");
        let mut queues = self.queues.lock().await;
        queues
            .entry(item.capability_key().to_string())
            .or_default()
            .push_back(item);
    }

    /// Put an item back at the head, used when a claim lost a race.
    pub async fn push_front(&self, item: WorkItem) {
        let mut queues = self.queues.lock().await;
        queues
            .entry(item.capability_key().to_string())
            .or_default()
            .push_front(item);
    }

    /// Claim the oldest item for a capability key.
    pub async fn pop_front(&self, capability_key: &str) -> Option<WorkItem> {
        let mut queues = self.queues.lock().await;
        let queue = queues.get_mut(capability_key)?;
        let item = queue.pop_front();
        if queue.is_empty() {
            queues.remove(capability_key);
        }
        item
    }

    /// Remove every queued item belonging to a task.
    pub async fn remove_task(&self, task_id: &str) -> Vec<WorkItem> {
        let mut queues = self.queues.lock().await;
        let mut removed = Vec::new();
        for queue in queues.values_mut() {
            let (matching, rest): (VecDeque<_>, VecDeque<_>) =
                queue.drain(..).partition(|item| item.task_id() == task_id);
            *queue = rest;
            removed.extend(matching);
        }
        queues.retain(|_, queue| !queue.is_empty());
        removed
    }

    /// Item ids queued for a capability key, head first.
    pub async fn item_ids(&self, capability_key: &str) -> Vec<String> {
        self.queues
            .lock()
            .await
            .get(capability_key)
            .map(|queue| queue.iter().map(|item| item.item_id().to_string()).collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, capability_key: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(capability_key)
            .map_or(0, VecDeque::len)
    }

    pub async fn total_len(&self) -> usize {
        self.queues.lock().await.values().map(VecDeque::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.total_len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::work_item::test_item;

    #[tokio::test]
    async fn fifo_per_capability() {
        let queue = CapabilityQueue::new();
        let (a, _ca) = test_item("t1", "cfg-a", 0);
        let (b, _cb) = test_item("t2", "cfg-b", 0);
        let (c, _cc) = test_item("t3", "cfg-a", 0);
        queue.push_back(a).await;
        queue.push_back(b).await;
        queue.push_back(c).await;

        assert_eq!(queue.len("cfg-a").await, 2);
        assert_eq!(queue.total_len().await, 3);
        assert_eq!(queue.pop_front("cfg-a").await.unwrap().task_id(), "t1");
        assert_eq!(queue.pop_front("cfg-a").await.unwrap().task_id(), "t3");
        assert!(queue.pop_front("cfg-a").await.is_none());
        assert!(queue.pop_front("missing").await.is_none());
        assert_eq!(queue.len("cfg-b").await, 1);
    }

    #[tokio::test]
    async fn push_front_restores_head() {
        let queue = CapabilityQueue::new();
        let (a, _ca) = test_item("t1", "cfg", 0);
        let (b, _cb) = test_item("t2", "cfg", 0);
        queue.push_back(a).await;
        queue.push_back(b).await;

        let head = queue.pop_front("cfg").await.unwrap();
        queue.push_front(head).await;
        assert_eq!(queue.item_ids("cfg").await, vec!["s_t1_0", "s_t2_0"]);
    }

    #[tokio::test]
    async fn remove_task_spans_all_capabilities() {
        let queue = CapabilityQueue::new();
        let (a, _ca) = test_item("t1", "cfg-a", 0);
        let (b, _cb) = test_item("t2", "cfg-a", 0);
        let (c, _cc) = test_item("t1", "cfg-b", 0);
        queue.push_back(a).await;
        queue.push_back(b).await;
        queue.push_back(c).await;

        let removed = queue.remove_task("t1").await;
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|item| item.task_id() == "t1"));
        assert_eq!(queue.item_ids("cfg-a").await, vec!["s_t2_0"]);
        assert_eq!(queue.len("cfg-b").await, 0);
    }
}
