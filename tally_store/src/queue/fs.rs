//! Directory-backed [`Queue`]
//!
//! Every task is one JSON file `<id>.json` in the queue directory. Leasing
//! rewrites the file with a new `leased_until`; deleting removes it. Files
//! are replaced through a write-then-rename so that a reader never observes a
//! partial task.
//!
//! Leases are exclusive between consumers in one process. Consumers in
//! separate processes sharing a directory may, rarely, both lease a task in
//! the same instant, which at-least-once consumers already tolerate.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tally_clock::{Clock, RealClock};
use tokio::{fs, sync::Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Error, NewTask, Queue, Task, visible};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Stored {
    id: String,
    tag: String,
    payload: String,
    not_before: i64,
    enqueued_at: f64,
    leased_until: Option<f64>,
}

impl From<&Stored> for Task {
    fn from(value: &Stored) -> Self {
        Task {
            id: value.id.clone(),
            payload: value.payload.clone(),
            tag: value.tag.clone(),
        }
    }
}

/// Queue persisted as one file per task in a directory.
#[derive(Debug)]
pub struct FsQueue<C = RealClock> {
    root: PathBuf,
    clock: C,
    // serializes read-modify-write of leases within this process
    lease_lock: Mutex<()>,
}

impl FsQueue<RealClock> {
    /// Open, creating if necessary, the queue directory at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn new<P>(root: P) -> Result<Self, Error>
    where
        P: Into<PathBuf>,
    {
        Self::with_clock(root, RealClock).await
    }
}

impl<C> FsQueue<C>
where
    C: Clock,
{
    /// Open, creating if necessary, the queue directory at `root`, reading
    /// time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn with_clock<P>(root: P, clock: C) -> Result<Self, Error>
    where
        P: Into<PathBuf>,
    {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|err| Error::Io {
            context: "create queue directory",
            err,
        })?;
        Ok(Self {
            root,
            clock,
            lease_lock: Mutex::new(()),
        })
    }

    /// The queue directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_path(&self, id: &str) -> Result<PathBuf, Error> {
        if id.is_empty() || id.starts_with('.') || id.contains(['/', '\\']) {
            return Err(Error::InvalidId(id.to_string()));
        }
        Ok(self.root.join(format!("{id}.json")))
    }

    async fn write_stored(&self, stored: &Stored) -> Result<(), Error> {
        let path = self.task_path(&stored.id)?;
        let tmp = self.root.join(format!(".{}.tmp", stored.id));
        let bytes = serde_json::to_vec(stored)?;
        fs::write(&tmp, bytes).await.map_err(|err| Error::Io {
            context: "write task",
            err,
        })?;
        fs::rename(&tmp, &path).await.map_err(|err| Error::Io {
            context: "rename task",
            err,
        })?;
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Stored>, Error> {
        let mut dir = fs::read_dir(&self.root).await.map_err(|err| Error::Io {
            context: "read queue directory",
            err,
        })?;
        let mut stored = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|err| Error::Io {
            context: "read queue entry",
            err,
        })? {
            let path = entry.path();
            let is_task = path.extension().is_some_and(|ext| ext == "json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if !is_task {
                continue;
            }
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                // deleted by a concurrent consumer
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(Error::Io {
                        context: "read task",
                        err,
                    });
                }
            };
            match serde_json::from_slice::<Stored>(&bytes) {
                Ok(s) => stored.push(s),
                Err(err) => warn!(path = %path.display(), "Skipping unreadable task file: {err}"),
            }
        }
        Ok(stored)
    }

    async fn lease_matching(
        &self,
        tag: Option<&str>,
        max_tasks: usize,
        lease: Duration,
    ) -> Result<Vec<Task>, Error> {
        let _guard = self.lease_lock.lock().await;
        let now = self.clock.now();

        let mut candidates: Vec<Stored> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|s| tag.is_none_or(|tag| s.tag == tag))
            .filter(|s| visible(s.not_before, s.leased_until, now))
            .collect();
        candidates.sort_by(|a, b| {
            a.not_before
                .cmp(&b.not_before)
                .then(a.enqueued_at.total_cmp(&b.enqueued_at))
        });
        candidates.truncate(max_tasks);

        let leased_until = now + lease.as_secs_f64();
        let mut tasks = Vec::with_capacity(candidates.len());
        for mut stored in candidates {
            stored.leased_until = Some(leased_until);
            self.write_stored(&stored).await?;
            tasks.push(Task::from(&stored));
        }
        debug!(leased = tasks.len(), ?tag, "Leased tasks");
        Ok(tasks)
    }
}

#[async_trait]
impl<C> Queue for FsQueue<C>
where
    C: Clock,
{
    async fn enqueue(&self, task: NewTask) -> Result<(), Error> {
        let stored = Stored {
            id: Uuid::new_v4().to_string(),
            tag: task.tag,
            payload: task.payload,
            not_before: task.not_before,
            enqueued_at: self.clock.now(),
            leased_until: None,
        };
        self.write_stored(&stored).await
    }

    async fn lease(&self, max_tasks: usize, lease: Duration) -> Result<Vec<Task>, Error> {
        self.lease_matching(None, max_tasks, lease).await
    }

    async fn lease_by_tag(
        &self,
        tag: &str,
        max_tasks: usize,
        lease: Duration,
    ) -> Result<Vec<Task>, Error> {
        self.lease_matching(Some(tag), max_tasks, lease).await
    }

    async fn delete(&self, tasks: &[Task]) -> Result<(), Error> {
        for task in tasks {
            let path = self.task_path(&task.id)?;
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(Error::Io {
                        context: "delete task",
                        err,
                    });
                }
            }
        }
        Ok(())
    }
}
