use crate::error::{QueryError, Result};
use cidx_vector_store::{keys, Payload};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Inclusive commit-date window for temporal queries, RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// Caller-supplied result filters, shared by all query kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    #[serde(default)]
    pub include_extensions: Vec<String>,
    #[serde(default)]
    pub exclude_extensions: Vec<String>,
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub regex: bool,
}

impl QueryFilters {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Compiled payload predicate for the path-shaped filters. Patterns use
/// gitwildmatch semantics: a pattern without `/` matches the basename at
/// any depth (like a `.gitignore` line); patterns with `/` match the full
/// relative path, where `*` does not cross separators and `**` spans any
/// number of them. The indexed path is read from `path` with fallback to
/// `file_path` (temporal payloads use the latter).
pub struct PathPredicate {
    include_full: GlobSet,
    include_base: GlobSet,
    has_includes: bool,
    exclude_full: GlobSet,
    exclude_base: GlobSet,
    include_extensions: Vec<String>,
    exclude_extensions: Vec<String>,
    language: Option<String>,
}

impl PathPredicate {
    pub fn compile(filters: &QueryFilters) -> Result<Self> {
        let (include_full, include_base) = split_globs(&filters.include_paths)?;
        let (exclude_full, exclude_base) = split_globs(&filters.exclude_paths)?;
        Ok(Self {
            include_full,
            include_base,
            has_includes: !filters.include_paths.is_empty(),
            exclude_full,
            exclude_base,
            include_extensions: lower_exts(&filters.include_extensions),
            exclude_extensions: lower_exts(&filters.exclude_extensions),
            language: filters.language.as_ref().map(|l| l.to_ascii_lowercase()),
        })
    }

    #[must_use]
    pub fn matches_payload(&self, payload: &Payload) -> bool {
        let Some(path) = payload.path_or_file_path() else {
            // Pathless payloads only survive when no path-shaped filter is
            // active.
            return !self.has_includes;
        };
        if !self.matches_path(path) {
            return false;
        }
        if let Some(wanted) = &self.language {
            let actual = payload.get_str(keys::LANGUAGE).unwrap_or_default();
            if !actual.eq_ignore_ascii_case(wanted) {
                return false;
            }
        }
        true
    }

    #[must_use]
    pub fn matches_path(&self, path: &str) -> bool {
        let path = path.trim_start_matches("./");
        let basename = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path);

        if matches_either(&self.exclude_full, &self.exclude_base, path, basename) {
            return false;
        }
        if self.has_includes
            && !matches_either(&self.include_full, &self.include_base, path, basename)
        {
            return false;
        }

        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if let Some(ext) = &extension {
            if self.exclude_extensions.contains(ext) {
                return false;
            }
        }
        if !self.include_extensions.is_empty() {
            match &extension {
                Some(ext) if self.include_extensions.contains(ext) => {}
                _ => return false,
            }
        }
        true
    }
}

fn lower_exts(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect()
}

fn split_globs(patterns: &[String]) -> Result<(GlobSet, GlobSet)> {
    let mut full = GlobSetBuilder::new();
    let mut base = GlobSetBuilder::new();
    for pattern in patterns {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            continue;
        }
        let glob = GlobBuilder::new(trimmed)
            .literal_separator(true)
            .build()
            .map_err(|err| {
                QueryError::InvalidQuery(format!("invalid path pattern '{trimmed}': {err}"))
            })?;
        if trimmed.contains('/') {
            full.add(glob);
        } else {
            base.add(glob);
        }
    }
    let full = full
        .build()
        .map_err(|err| QueryError::InvalidQuery(err.to_string()))?;
    let base = base
        .build()
        .map_err(|err| QueryError::InvalidQuery(err.to_string()))?;
    Ok((full, base))
}

fn matches_either(full: &GlobSet, base: &GlobSet, path: &str, basename: &str) -> bool {
    if !full.is_empty() {
        if full.is_match(path) {
            return true;
        }
        // Directory-shaped patterns also cover everything beneath them.
        let mut end = path.len();
        while let Some(pos) = path[..end].rfind('/') {
            if full.is_match(&path[..pos]) {
                return true;
            }
            end = pos;
        }
    }
    if !base.is_empty() {
        if base.is_match(basename) {
            return true;
        }
        if path.split('/').any(|component| base.is_match(component)) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payload_with(key: &str, path: &str) -> Payload {
        let mut payload = Payload::new();
        payload.insert(key, path);
        payload
    }

    fn predicate(filters: QueryFilters) -> PathPredicate {
        PathPredicate::compile(&filters).unwrap()
    }

    #[test]
    fn basename_pattern_matches_at_any_depth() {
        let p = predicate(QueryFilters {
            include_paths: vec!["*.py".to_string()],
            ..QueryFilters::default()
        });
        assert!(p.matches_path("tests/e2e/test_x.py"));
        assert!(p.matches_path("setup.py"));
        assert!(!p.matches_path("src/lib.rs"));
    }

    #[test]
    fn temporal_payload_matches_via_file_path() {
        let p = predicate(QueryFilters {
            include_paths: vec!["*.py".to_string()],
            ..QueryFilters::default()
        });
        let temporal = payload_with(keys::FILE_PATH, "tests/e2e/test_x.py");
        assert!(p.matches_payload(&temporal));

        let regular = payload_with(keys::PATH, "src/app.py");
        assert!(p.matches_payload(&regular));
    }

    #[test]
    fn slashed_pattern_matches_full_path_only() {
        let p = predicate(QueryFilters {
            include_paths: vec!["src/*.rs".to_string()],
            ..QueryFilters::default()
        });
        assert!(p.matches_path("src/lib.rs"));
        // `*` must not cross a separator.
        assert!(!p.matches_path("src/deep/lib.rs"));
        assert!(!p.matches_path("other/lib.rs"));
    }

    #[test]
    fn double_star_matches_root_level() {
        let p = predicate(QueryFilters {
            include_paths: vec!["**/*.md".to_string()],
            ..QueryFilters::default()
        });
        assert!(p.matches_path("README.md"));
        assert!(p.matches_path("docs/deep/guide.md"));
    }

    #[test]
    fn exclude_beats_include() {
        let p = predicate(QueryFilters {
            include_paths: vec!["**/*.rs".to_string()],
            exclude_paths: vec!["tests/**".to_string()],
            ..QueryFilters::default()
        });
        assert!(p.matches_path("src/lib.rs"));
        assert!(!p.matches_path("tests/integration.rs"));
    }

    #[test]
    fn directory_include_covers_descendants() {
        let p = predicate(QueryFilters {
            include_paths: vec!["**/node_modules".to_string()],
            ..QueryFilters::default()
        });
        assert!(p.matches_path("node_modules/pkg/index.js"));
        assert!(p.matches_path("a/b/node_modules/pkg/index.js"));
        assert!(!p.matches_path("src/index.js"));
    }

    #[test]
    fn extension_filters_apply() {
        let p = predicate(QueryFilters {
            include_extensions: vec![".rs".to_string()],
            ..QueryFilters::default()
        });
        assert!(p.matches_path("src/lib.rs"));
        assert!(!p.matches_path("src/lib.py"));

        let p = predicate(QueryFilters {
            exclude_extensions: vec!["md".to_string()],
            ..QueryFilters::default()
        });
        assert!(!p.matches_path("README.md"));
        assert!(p.matches_path("src/lib.rs"));
    }

    #[test]
    fn language_filter_reads_payload() {
        let p = predicate(QueryFilters {
            language: Some("rust".to_string()),
            ..QueryFilters::default()
        });
        let mut rust = payload_with(keys::PATH, "a.rs");
        rust.insert(keys::LANGUAGE, "rust");
        assert!(p.matches_payload(&rust));

        let mut python = payload_with(keys::PATH, "a.py");
        python.insert(keys::LANGUAGE, "python");
        assert!(!p.matches_payload(&python));
    }

    #[test]
    fn no_filters_passes_everything() {
        let p = predicate(QueryFilters::default());
        assert!(p.matches_path("anything/at/all.xyz"));
        assert!(p.matches_payload(&Payload::new()));
    }

    #[test]
    fn invalid_pattern_is_invalid_query() {
        let result = PathPredicate::compile(&QueryFilters {
            include_paths: vec!["[".to_string()],
            ..QueryFilters::default()
        });
        assert!(matches!(result, Err(QueryError::InvalidQuery(_))));
    }
}
