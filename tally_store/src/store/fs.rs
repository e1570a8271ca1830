//! Directory-backed [`Store`]
//!
//! Store path `/a/b/c.json` lives at `<root>/a/b/c.json` with its metadata in
//! the sidecar `<root>/a/b/c.json.meta.json`. Content and sidecar are each
//! replaced through a write-then-rename. A file without a sidecar is readable
//! through [`Store::get`] but never listed.

use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::fs;
use tracing::warn;

use super::{Error, File, Filter, Meta, Store, is_below, normalize, normalize_dir};

const META_SUFFIX: &str = ".meta.json";

/// Store persisted as a directory tree.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open, creating if necessary, the store directory at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn new<P>(root: P) -> Result<Self, Error>
    where
        P: Into<PathBuf>,
    {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|err| Error::Io {
            context: "create store directory",
            err,
        })?;
        Ok(Self { root })
    }

    /// The store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn local_path(&self, path: &str) -> PathBuf {
        // normalized paths are `/`-prefixed, never contain `..`
        let mut local = self.root.clone();
        local.extend(path.split('/').filter(|s| !s.is_empty()));
        local
    }

    fn store_path(&self, local: &Path) -> Option<String> {
        let rel = local.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = rel.iter().map(|s| s.to_str()).collect();
        Some(format!("/{}", segments?.join("/")))
    }
}

fn sidecar(local: &Path) -> PathBuf {
    let mut name = local.as_os_str().to_owned();
    name.push(META_SUFFIX);
    PathBuf::from(name)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).await.map_err(|err| Error::Io {
        context: "write store file",
        err,
    })?;
    fs::rename(&tmp, path).await.map_err(|err| Error::Io {
        context: "rename store file",
        err,
    })
}

async fn read_optional(path: &Path, context: &'static str) -> Result<Option<String>, Error> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::Io { context, err }),
    }
}

#[async_trait]
impl Store for FsStore {
    async fn get(&self, path: &str) -> Result<Option<String>, Error> {
        let path = normalize(path)?;
        read_optional(&self.local_path(&path), "read store file").await
    }

    async fn write(&self, path: &str, content: String, meta: Meta) -> Result<(), Error> {
        let path = normalize(path)?;
        if path.ends_with(META_SUFFIX) {
            return Err(Error::InvalidPath(path));
        }
        let local = self.local_path(&path);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await.map_err(|err| Error::Io {
                context: "create store directory",
                err,
            })?;
        }
        write_atomic(&local, content.as_bytes()).await?;
        write_atomic(&sidecar(&local), &serde_json::to_vec(&meta)?).await
    }

    async fn list_files(
        &self,
        base_dir: &str,
        recursive: bool,
        filter: &Filter,
    ) -> Result<Vec<File>, Error> {
        let base_dir = normalize_dir(base_dir)?;
        let mut pending = vec![self.local_path(&base_dir)];
        let mut files = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(Error::Io {
                        context: "read store directory",
                        err,
                    });
                }
            };
            while let Some(entry) = entries.next_entry().await.map_err(|err| Error::Io {
                context: "read store entry",
                err,
            })? {
                let local = entry.path();
                let file_type = entry.file_type().await.map_err(|err| Error::Io {
                    context: "read store entry type",
                    err,
                })?;
                if file_type.is_dir() {
                    if recursive {
                        pending.push(local);
                    }
                    continue;
                }
                let Some(meta_path) = self.store_path(&local) else {
                    continue;
                };
                let Some(path) = meta_path.strip_suffix(META_SUFFIX) else {
                    continue;
                };
                if !is_below(path, &base_dir, recursive) {
                    continue;
                }
                let Some(raw_meta) = read_optional(&local, "read store sidecar").await? else {
                    continue;
                };
                let meta: Meta = match serde_json::from_str(&raw_meta) {
                    Ok(meta) => meta,
                    Err(err) => {
                        warn!(path, "Skipping file with unreadable metadata: {err}");
                        continue;
                    }
                };
                if !filter.matches(&meta) {
                    continue;
                }
                let Some(content) = read_optional(&self.local_path(path), "read store file").await?
                else {
                    continue;
                };
                files.push(File {
                    path: path.to_string(),
                    content,
                    meta,
                });
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
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
    async fn write_get_list() {
        let dir = tempfile::tempdir().expect("directory could not be created");
        let store = FsStore::new(dir.path()).await.expect("store opens");

        assert_eq!(store.get("/c/2015/05/15/x/data.json").await.expect("get"), None);
        store
            .write("/c/2015/05/15/x/data.json", "[[1,1]]".to_string(), meta("x", 15))
            .await
            .expect("write");
        store
            .write("/c/2015/05/14/x/data.json", "[[0,1]]".to_string(), meta("x", 14))
            .await
            .expect("write");
        store
            .write("/c/2015/05/15/x/y/data.json", "[[2,1]]".to_string(), meta("x/y", 15))
            .await
            .expect("write");

        assert_eq!(
            store
                .get("/c/2015/05/15/x/data.json")
                .await
                .expect("get")
                .as_deref(),
            Some("[[1,1]]")
        );
        assert!(dir.path().join("c/2015/05/15/x/data.json.meta.json").exists());

        let all = store
            .list_files("/c", true, &Filter::default())
            .await
            .expect("list");
        let paths: Vec<&str> = all.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/c/2015/05/14/x/data.json",
                "/c/2015/05/15/x/data.json",
                "/c/2015/05/15/x/y/data.json",
            ]
        );

        let filter = Filter {
            counter_name: Some("x".to_string()),
            start: NaiveDate::from_ymd_opt(2015, 5, 15),
            end: None,
        };
        let matched = store.list_files("/c", true, &filter).await.expect("list");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].content, "[[1,1]]");
        assert_eq!(matched[0].meta, meta("x", 15));
    }

    #[tokio::test]
    async fn non_recursive_and_missing_dirs() {
        let dir = tempfile::tempdir().expect("directory could not be created");
        let store = FsStore::new(dir.path()).await.expect("store opens");
        store
            .write("/c/top.json", "1".to_string(), meta("top", 1))
            .await
            .expect("write");
        store
            .write("/c/deeper/below.json", "2".to_string(), meta("below", 1))
            .await
            .expect("write");

        let shallow = store
            .list_files("/c", false, &Filter::default())
            .await
            .expect("list");
        assert_eq!(shallow.len(), 1);
        assert_eq!(shallow[0].path, "/c/top.json");

        let missing = store
            .list_files("/nothing/here", true, &Filter::default())
            .await
            .expect("list");
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn rejects_sidecar_and_escaping_paths() {
        let dir = tempfile::tempdir().expect("directory could not be created");
        let store = FsStore::new(dir.path()).await.expect("store opens");
        assert!(matches!(
            store
                .write("/c/x.meta.json", String::new(), meta("x", 1))
                .await,
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            store.get("/../etc/passwd").await,
            Err(Error::InvalidPath(_))
        ));
    }
}
