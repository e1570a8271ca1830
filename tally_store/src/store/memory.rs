//! In-memory [`Store`] for single-process use and tests.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Error, File, Filter, Meta, Store, is_below, normalize, normalize_dir};

#[derive(Debug, Default)]
struct Inner {
    files: BTreeMap<String, (String, Meta)>,
    writes: u64,
}

/// In-memory store. Clones share the same files.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create a new, empty [`MemoryStore`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of successful writes since creation.
    pub async fn writes(&self) -> u64 {
        self.inner.lock().await.writes
    }

    /// Every stored path, in order.
    pub async fn paths(&self) -> Vec<String> {
        self.inner.lock().await.files.keys().cloned().collect()
    }

    /// The metadata stored at `path`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a valid store path.
    pub async fn meta(&self, path: &str) -> Result<Option<Meta>, Error> {
        let path = normalize(path)?;
        let inner = self.inner.lock().await;
        Ok(inner.files.get(&path).map(|(_, meta)| meta.clone()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<String>, Error> {
        let path = normalize(path)?;
        let inner = self.inner.lock().await;
        Ok(inner.files.get(&path).map(|(content, _)| content.clone()))
    }

    async fn write(&self, path: &str, content: String, meta: Meta) -> Result<(), Error> {
        let path = normalize(path)?;
        let mut inner = self.inner.lock().await;
        inner.files.insert(path, (content, meta));
        inner.writes += 1;
        Ok(())
    }

    async fn list_files(
        &self,
        base_dir: &str,
        recursive: bool,
        filter: &Filter,
    ) -> Result<Vec<File>, Error> {
        let base_dir = normalize_dir(base_dir)?;
        let inner = self.inner.lock().await;
        Ok(inner
            .files
            .iter()
            .filter(|(path, (_, meta))| is_below(path, &base_dir, recursive) && filter.matches(meta))
            .map(|(path, (content, meta))| File {
                path: path.clone(),
                content: content.clone(),
                meta: meta.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn meta(name: &str, d: u32) -> Meta {
        Meta {
            counter_name: name.to_string(),
            date: NaiveDate::from_ymd_opt(2015, 5, d).expect("valid date"),
        }
    }

    #[tokio::test]
    async fn write_get_overwrite() {
        let store = MemoryStore::new();
        assert_eq!(store.get("/a/b.json").await.expect("get"), None);

        store
            .write("/a/b.json", "[1]".to_string(), meta("b", 1))
            .await
            .expect("write");
        store
            .write("a/b.json", "[1,2]".to_string(), meta("b", 2))
            .await
            .expect("write");

        assert_eq!(
            store.get("/a/b.json").await.expect("get").as_deref(),
            Some("[1,2]")
        );
        assert_eq!(store.meta("/a/b.json").await.expect("meta"), Some(meta("b", 2)));
        assert_eq!(store.writes().await, 2);
        assert_eq!(store.paths().await, vec!["/a/b.json".to_string()]);
    }

    #[tokio::test]
    async fn list_filters_on_meta_and_depth() {
        let store = MemoryStore::new();
        for (path, name, day) in [
            ("/base/2015/05/14/x/data.json", "x", 14),
            ("/base/2015/05/15/x/data.json", "x", 15),
            ("/base/2015/05/15/y/data.json", "y", 15),
            ("/other/2015/05/15/x/data.json", "x", 15),
            ("/base/top.json", "x", 15),
        ] {
            store
                .write(path, format!("{day}"), meta(name, day))
                .await
                .expect("write");
        }

        let filter = Filter {
            counter_name: Some("x".to_string()),
            start: NaiveDate::from_ymd_opt(2015, 5, 15),
            end: NaiveDate::from_ymd_opt(2015, 5, 15),
        };
        let files = store.list_files("/base", true, &filter).await.expect("list");
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/base/2015/05/15/x/data.json", "/base/top.json"]);

        let shallow = store.list_files("/base/", false, &filter).await.expect("list");
        assert_eq!(shallow.len(), 1);
        assert_eq!(shallow[0].path, "/base/top.json");
        assert_eq!(shallow[0].content, "15");
    }

    #[tokio::test]
    async fn rejects_bad_paths() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.write("/a/../b", String::new(), meta("b", 1)).await,
            Err(Error::InvalidPath(_))
        ));
        assert_eq!(store.writes().await, 0);
    }
}
