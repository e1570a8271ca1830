//! Test-only queue and store implementations that fail on demand.

use std::time::Duration;

use async_trait::async_trait;
use tally_store::{
    File, Filter, MemoryStore, Meta, NewTask, Queue, Store, Task, queue, store,
};

/// A queue that refuses every request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FailingQueue;

#[async_trait]
impl Queue for FailingQueue {
    async fn enqueue(&self, _task: NewTask) -> Result<(), queue::Error> {
        Err(queue::Error::Unavailable("enqueue refused".to_string()))
    }

    async fn lease(&self, _max_tasks: usize, _lease: Duration) -> Result<Vec<Task>, queue::Error> {
        Err(queue::Error::Unavailable("lease refused".to_string()))
    }

    async fn lease_by_tag(
        &self,
        _tag: &str,
        _max_tasks: usize,
        _lease: Duration,
    ) -> Result<Vec<Task>, queue::Error> {
        Err(queue::Error::Unavailable("lease refused".to_string()))
    }

    async fn delete(&self, _tasks: &[Task]) -> Result<(), queue::Error> {
        Err(queue::Error::Unavailable("delete refused".to_string()))
    }
}

/// A store that reads from an inner [`MemoryStore`] but refuses writes.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReadOnlyStore {
    pub(crate) inner: MemoryStore,
}

#[async_trait]
impl Store for ReadOnlyStore {
    async fn get(&self, path: &str) -> Result<Option<String>, store::Error> {
        self.inner.get(path).await
    }

    async fn write(&self, _path: &str, _content: String, _meta: Meta) -> Result<(), store::Error> {
        Err(store::Error::Unavailable("write refused".to_string()))
    }

    async fn list_files(
        &self,
        base_dir: &str,
        recursive: bool,
        filter: &Filter,
    ) -> Result<Vec<File>, store::Error> {
        self.inner.list_files(base_dir, recursive, filter).await
    }
}
