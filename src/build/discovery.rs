//! Source file discovery.
//!
//! Resolves a task's glob patterns into an immutable, sorted [`SourceSet`].
//! Each file remembers its path below the pattern's glob base (the part
//! before the first wildcard), which is how outputs keep their layout.

use glob::{glob_with, MatchOptions, Pattern};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Error during source discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Invalid glob pattern
    #[error("Invalid glob pattern '{0}': {1}")]
    InvalidPattern(String, glob::PatternError),
    /// A pattern without wildcards names a file that does not exist
    #[error("File not found: {}", .0.display())]
    MissingFile(PathBuf),
    /// IO error during file enumeration
    #[error("IO error during discovery: {0}")]
    Io(#[from] std::io::Error),
}

/// Options used for every pattern match.
///
/// `*` never crosses a directory separator; only `**` does.
pub fn match_options() -> MatchOptions {
    MatchOptions { case_sensitive: true, require_literal_separator: true, require_literal_leading_dot: false }
}

/// A resolved source file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceFile {
    /// Absolute (or root-joined) path on disk
    pub path: PathBuf,
    /// Path below the glob base, used to name outputs
    pub relative: PathBuf,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, relative: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), relative: relative.into() }
    }
}

/// Immutable list of source files handed to a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSet {
    files: Vec<SourceFile>,
}

impl SourceSet {
    /// Create a set, sorted by path with duplicates removed.
    pub fn new(files: Vec<SourceFile>) -> Self {
        let mut by_path: BTreeMap<PathBuf, SourceFile> = BTreeMap::new();
        for file in files {
            by_path.entry(file.path.clone()).or_insert(file);
        }
        Self { files: by_path.into_values().collect() }
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Whether a path segment contains glob syntax.
pub fn has_magic(segment: &str) -> bool {
    segment.contains(['*', '?', '['])
}

/// The non-wildcard directory prefix of a pattern.
///
/// `assets/img/**/*.png` → `assets/img`; `node_modules/a/dist/a.js` → `node_modules/a/dist`.
pub fn glob_base(pattern: &str) -> PathBuf {
    let segments: Vec<&str> = pattern.split('/').collect();
    let magic_at = segments.iter().position(|s| has_magic(s));
    let take = match magic_at {
        Some(i) => i,
        // A literal file: its base is the parent directory
        None => segments.len().saturating_sub(1),
    };
    segments[..take].iter().filter(|s| !s.is_empty() && **s != ".").collect()
}

/// Discover files matching a single pattern, relative to `base_dir`.
///
/// Patterns without wildcards must name an existing file.
pub fn discover_files(base_dir: &Path, pattern: &str) -> Result<Vec<SourceFile>, DiscoveryError> {
    let glob_root = base_dir.join(glob_base(pattern));

    if !has_magic(pattern) {
        let path = base_dir.join(pattern);
        if !path.is_file() {
            return Err(DiscoveryError::MissingFile(path));
        }
        let relative = path.strip_prefix(&glob_root).unwrap_or(&path).to_path_buf();
        return Ok(vec![SourceFile::new(path, relative)]);
    }

    let full_pattern =
        format!("{}/{}", Pattern::escape(&base_dir.to_string_lossy()), pattern.trim_start_matches("./"));

    let paths = glob_with(&full_pattern, match_options())
        .map_err(|e| DiscoveryError::InvalidPattern(pattern.to_string(), e))?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => {
                if path.is_file() {
                    let relative = path.strip_prefix(&glob_root).unwrap_or(&path).to_path_buf();
                    files.push(SourceFile::new(path, relative));
                }
            }
            Err(e) => {
                // Unreadable directories are skipped, not fatal
                tracing::warn!("error reading path: {}", e);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// A compiled set of patterns matched against project-relative paths.
///
/// Patterns prefixed with `!` exclude.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PatternSet {
    pub fn new(patterns: &[String]) -> Result<Self, DiscoveryError> {
        let mut set = PatternSet::default();
        for raw in patterns {
            let (negated, text) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw.as_str()),
            };
            let text = text.trim_start_matches("./");
            let pattern = Pattern::new(text)
                .map_err(|e| DiscoveryError::InvalidPattern(raw.clone(), e))?;
            if negated {
                set.exclude.push(pattern);
            } else {
                set.include.push(pattern);
            }
        }
        Ok(set)
    }

    /// Whether a project-relative path is selected.
    pub fn matches(&self, relative: &Path) -> bool {
        let opts = match_options();
        self.include.iter().any(|p| p.matches_path_with(relative, opts))
            && !self.exclude.iter().any(|p| p.matches_path_with(relative, opts))
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }
}

/// Resolve a task's patterns into its source set.
///
/// Positive patterns are unioned, `!` patterns remove matches.
pub fn resolve_sources(root: &Path, patterns: &[String]) -> Result<SourceSet, DiscoveryError> {
    let excludes = PatternSet::new(
        &patterns
            .iter()
            .filter_map(|p| p.strip_prefix('!').map(|s| s.to_string()))
            .collect::<Vec<_>>(),
    )?;

    let mut files = Vec::new();
    for pattern in patterns.iter().filter(|p| !p.starts_with('!')) {
        files.extend(discover_files(root, pattern)?);
    }

    if !excludes.is_empty() {
        files.retain(|f| {
            let relative = f.path.strip_prefix(root).unwrap_or(&f.path);
            !excludes.matches(relative)
        });
    }

    Ok(SourceSet::new(files))
}

/// Lexically normalize a relative path (drop `.` and resolve `..` where possible).
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
