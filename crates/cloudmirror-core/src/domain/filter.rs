//! Entry filters applied before task construction
//!
//! Filters only ever look at files. Directories always pass, since a kept
//! file may live beneath any of them.

use std::fmt;
use std::sync::Arc;

use super::remote_entry::RemoteEntry;

/// Caller-supplied predicate; returning `false` excludes the entry
pub type EntryPredicate = Arc<dyn Fn(&RemoteEntry) -> bool + Send + Sync>;

/// Declarative and predicate-based entry filter
///
/// An empty filter accepts everything. Extension lists are compared
/// case-insensitively and without the leading dot. Name matching is a
/// case-sensitive substring test on the final path component.
#[derive(Clone, Default)]
pub struct SyncFilter {
    include_extensions: Vec<String>,
    exclude_extensions: Vec<String>,
    min_size: Option<u64>,
    max_size: Option<u64>,
    name_contains: Vec<String>,
    name_excludes: Vec<String>,
    predicates: Vec<EntryPredicate>,
}

fn normalize_extension(ext: impl AsRef<str>) -> String {
    ext.as_ref().trim_start_matches('.').to_ascii_lowercase()
}

impl SyncFilter {
    /// A filter that accepts every entry
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only files whose extension is listed
    pub fn with_include_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.include_extensions = extensions.into_iter().map(normalize_extension).collect();
        self
    }

    /// Drop files whose extension is listed
    pub fn with_exclude_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclude_extensions = extensions.into_iter().map(normalize_extension).collect();
        self
    }

    pub fn with_min_size(mut self, min_size: u64) -> Self {
        self.min_size = Some(min_size);
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Keep only files whose name contains at least one of the substrings
    pub fn with_name_contains<I, S>(mut self, needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.name_contains = needles.into_iter().map(Into::into).collect();
        self
    }

    /// Drop files whose name contains any of the substrings
    pub fn with_name_excludes<I, S>(mut self, needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.name_excludes = needles.into_iter().map(Into::into).collect();
        self
    }

    /// Add an arbitrary predicate; all predicates must accept the entry
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RemoteEntry) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// Whether the filter accepts everything
    pub fn is_empty(&self) -> bool {
        self.include_extensions.is_empty()
            && self.exclude_extensions.is_empty()
            && self.min_size.is_none()
            && self.max_size.is_none()
            && self.name_contains.is_empty()
            && self.name_excludes.is_empty()
            && self.predicates.is_empty()
    }

    /// Whether `entry` passes every configured rule
    pub fn accepts(&self, entry: &RemoteEntry) -> bool {
        if entry.is_directory {
            return true;
        }

        let extension = entry.path.extension().map(normalize_extension);
        if !self.include_extensions.is_empty() {
            match &extension {
                Some(ext) if self.include_extensions.contains(ext) => {}
                _ => return false,
            }
        }
        if let Some(ext) = &extension {
            if self.exclude_extensions.contains(ext) {
                return false;
            }
        }

        if self.min_size.is_some_and(|min| entry.size < min) {
            return false;
        }
        if self.max_size.is_some_and(|max| entry.size > max) {
            return false;
        }

        let name = entry.path.file_name();
        if !self.name_contains.is_empty()
            && !self.name_contains.iter().any(|n| name.contains(n.as_str()))
        {
            return false;
        }
        if self.name_excludes.iter().any(|n| name.contains(n.as_str())) {
            return false;
        }

        self.predicates.iter().all(|p| p(entry))
    }
}

impl fmt::Debug for SyncFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncFilter")
            .field("include_extensions", &self.include_extensions)
            .field("exclude_extensions", &self.exclude_extensions)
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("name_contains", &self.name_contains)
            .field("name_excludes", &self.name_excludes)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}
