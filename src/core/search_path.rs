// src/core/search_path.rs

/// An ordered view over the directories of a colon-delimited search path.
///
/// `SearchPath` borrows the raw `PATH`-style string it was built from; the
/// entries it yields are non-owning slices into that string and never outlive
/// it. Parsing happens on every resolution attempt and nothing is cached
/// across calls.
#[derive(Debug, Clone, Copy)]
pub struct SearchPath<'a> {
    raw: &'a str,
}

impl<'a> SearchPath<'a> {
    /// Wraps a colon-delimited path string (e.g. `"/usr/bin:/bin"`).
    pub fn new(raw: &'a str) -> Self {
        Self { raw }
    }

    /// Iterates the directory entries in declaration order.
    ///
    /// Empty segments (leading, trailing, or doubled colons) are skipped and
    /// iteration continues past them: resolving against the current working
    /// directory is out of scope here.
    pub fn entries(&self) -> impl Iterator<Item = &'a str> {
        self.raw.split(':').filter(|dir| !dir.is_empty())
    }

    /// True if the path contains no usable directory entry.
    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }
}
