//! In-memory [`Queue`] for single-process use and tests.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tally_clock::{Clock, RealClock};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Error, NewTask, Queue, Task, visible};

#[derive(Debug)]
struct Entry {
    task: Task,
    not_before: i64,
    leased_until: Option<f64>,
}

#[derive(Debug, Default)]
struct Inner {
    // insertion order, ties on not_before lease in this order
    entries: Vec<Entry>,
}

/// In-memory queue. Clones share the same tasks.
#[derive(Debug, Clone)]
pub struct MemoryQueue<C = RealClock> {
    inner: Arc<Mutex<Inner>>,
    clock: C,
}

impl MemoryQueue<RealClock> {
    /// Create a new, empty [`MemoryQueue`] on real-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(RealClock)
    }
}

impl Default for MemoryQueue<RealClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> MemoryQueue<C>
where
    C: Clock,
{
    /// Create a new, empty [`MemoryQueue`] reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
        }
    }

    /// The number of tasks in the queue, leased or not.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Whether the queue holds no tasks at all.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every task in the queue, leased or not, in insertion order.
    pub async fn tasks(&self) -> Vec<Task> {
        let inner = self.inner.lock().await;
        inner.entries.iter().map(|e| e.task.clone()).collect()
    }

    async fn lease_matching(
        &self,
        tag: Option<&str>,
        max_tasks: usize,
        lease: Duration,
    ) -> Vec<Task> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let mut candidates: Vec<usize> = inner
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| tag.is_none_or(|tag| e.task.tag == tag))
            .filter(|(_, e)| visible(e.not_before, e.leased_until, now))
            .map(|(idx, _)| idx)
            .collect();
        candidates.sort_by_key(|idx| inner.entries[*idx].not_before);
        candidates.truncate(max_tasks);

        let leased_until = now + lease.as_secs_f64();
        candidates
            .into_iter()
            .map(|idx| {
                let entry = &mut inner.entries[idx];
                entry.leased_until = Some(leased_until);
                entry.task.clone()
            })
            .collect()
    }
}

#[async_trait]
impl<C> Queue for MemoryQueue<C>
where
    C: Clock,
{
    async fn enqueue(&self, task: NewTask) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        inner.entries.push(Entry {
            task: Task {
                id: Uuid::new_v4().to_string(),
                payload: task.payload,
                tag: task.tag,
            },
            not_before: task.not_before,
            leased_until: None,
        });
        Ok(())
    }

    async fn lease(&self, max_tasks: usize, lease: Duration) -> Result<Vec<Task>, Error> {
        Ok(self.lease_matching(None, max_tasks, lease).await)
    }

    async fn lease_by_tag(
        &self,
        tag: &str,
        max_tasks: usize,
        lease: Duration,
    ) -> Result<Vec<Task>, Error> {
        Ok(self.lease_matching(Some(tag), max_tasks, lease).await)
    }

    async fn delete(&self, tasks: &[Task]) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        inner
            .entries
            .retain(|e| !tasks.iter().any(|t| t.id == e.task.id));
        Ok(())
    }
}
