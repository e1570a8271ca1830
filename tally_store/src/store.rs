//! The hierarchical permanent store contract
//!
//! Paths are `/`-separated strings, e.g.
//! `/_tally/stats/counters/2015/05/15/page/view/data-10s.json`. Every write
//! replaces the content at a path and attaches [`Meta`], which
//! [`Store::list_files`] filters on.

use std::io;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Errors produced by [`Store`] implementations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper around [`io::Error`].
    #[error("[{context}] Io error: {err}")]
    Io {
        /// The context for the error, simple tag
        context: &'static str,
        /// The underlying error
        err: io::Error,
    },
    /// Wrapper around [`serde_json::Error`].
    #[error("Json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A path that cannot name a stored file.
    #[error("Invalid store path: {0}")]
    InvalidPath(String),
    /// The backing service refused the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Metadata attached to every stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// The counter whose record this file holds.
    pub counter_name: String,
    /// The calendar day, UTC, the record covers.
    pub date: NaiveDate,
}

/// Restricts [`Store::list_files`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Only files for this counter.
    pub counter_name: Option<String>,
    /// Only files dated on or after this day.
    pub start: Option<NaiveDate>,
    /// Only files dated on or before this day.
    pub end: Option<NaiveDate>,
}

impl Filter {
    /// Whether `meta` passes this filter.
    #[must_use]
    pub fn matches(&self, meta: &Meta) -> bool {
        self.counter_name
            .as_deref()
            .is_none_or(|name| name == meta.counter_name)
            && self.start.is_none_or(|start| meta.date >= start)
            && self.end.is_none_or(|end| meta.date <= end)
    }
}

/// A file returned by [`Store::list_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Full store path.
    pub path: String,
    /// Content as last written.
    pub content: String,
    /// Metadata as last written.
    pub meta: Meta,
}

#[async_trait]
/// A hierarchical, metadata-filterable store.
pub trait Store: Send + Sync {
    /// The content at `path`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing service fails.
    async fn get(&self, path: &str) -> Result<Option<String>, Error>;

    /// Replace the content and metadata at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write could not be made durable.
    async fn write(&self, path: &str, content: String, meta: Meta) -> Result<(), Error>;

    /// Every file below `base_dir` whose metadata passes `filter`, ordered by
    /// path. Without `recursive` only direct children of `base_dir` are
    /// considered.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing service fails.
    async fn list_files(
        &self,
        base_dir: &str,
        recursive: bool,
        filter: &Filter,
    ) -> Result<Vec<File>, Error>;
}

/// Normalize a store path: a leading `/`, no empty, `.` or `..` segments and
/// no trailing `/`.
fn normalize(path: &str) -> Result<String, Error> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == ".." || s.contains('\\')) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(format!("/{}", segments.join("/")))
}

/// As [`normalize`], also accepting the root directory `/`.
fn normalize_dir(path: &str) -> Result<String, Error> {
    if path.split('/').all(str::is_empty) {
        return Ok("/".to_string());
    }
    normalize(path)
}

/// Whether normalized `path` lies below normalized `base_dir`.
fn is_below(path: &str, base_dir: &str, recursive: bool) -> bool {
    let prefix = if base_dir == "/" {
        "/".to_string()
    } else {
        format!("{base_dir}/")
    };
    match path.strip_prefix(&prefix) {
        Some(rest) => !rest.is_empty() && (recursive || !rest.contains('/')),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, y: i32, m: u32, d: u32) -> Meta {
        Meta {
            counter_name: name.to_string(),
            date: NaiveDate::from_ymd_opt(y, m, d).expect("valid date"),
        }
    }

    #[test]
    fn filter_matches_inclusive_range() {
        let filter = Filter {
            counter_name: Some("page/view".to_string()),
            start: NaiveDate::from_ymd_opt(2015, 5, 14),
            end: NaiveDate::from_ymd_opt(2015, 5, 15),
        };
        assert!(filter.matches(&meta("page/view", 2015, 5, 14)));
        assert!(filter.matches(&meta("page/view", 2015, 5, 15)));
        assert!(!filter.matches(&meta("page/view", 2015, 5, 13)));
        assert!(!filter.matches(&meta("page/view", 2015, 5, 16)));
        assert!(!filter.matches(&meta("page/views", 2015, 5, 15)));
        assert!(Filter::default().matches(&meta("anything", 1970, 1, 1)));
    }

    #[test]
    fn normalizes_paths() {
        assert_eq!(normalize("a/b//c/").expect("valid"), "/a/b/c");
        assert_eq!(normalize("/a").expect("valid"), "/a");
        assert!(normalize("/").is_err());
        assert!(normalize("/a/../b").is_err());
        assert!(normalize("/a/./b").is_err());
        assert_eq!(normalize_dir("/").expect("valid"), "/");
        assert_eq!(normalize_dir("/a/").expect("valid"), "/a");
    }

    #[test]
    fn below_respects_recursion() {
        assert!(is_below("/a/b", "/a", false));
        assert!(!is_below("/a/b/c", "/a", false));
        assert!(is_below("/a/b/c", "/a", true));
        assert!(!is_below("/ab/c", "/a", true));
        assert!(!is_below("/a", "/a", true));
        assert!(is_below("/a/b", "/", true));
    }
}
