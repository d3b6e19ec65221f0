use crate::config::{FilterOverrides, ProjectConfig};
use crate::error::{IndexerError, Result};
use crate::layout::META_DIR;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Repository walker with gitignore-aware traversal plus per-project
/// override rules. For each candidate, evaluation order is:
///
/// 1. force_exclude_patterns (wins over everything)
/// 2. force_include_patterns
/// 3. remove_extensions
/// 4. add_extensions
/// 5. add_exclude_dirs
/// 6. add_include_dirs
/// 7. base extension / exclude-dir decision
pub struct FileWalker {
    root: PathBuf,
    base_extensions: HashSet<String>,
    base_exclude_dirs: HashSet<String>,
    add_extensions: HashSet<String>,
    remove_extensions: HashSet<String>,
    add_include_dirs: Vec<String>,
    add_exclude_dirs: Vec<String>,
    force_include: GlobSet,
    force_exclude: GlobSet,
}

impl FileWalker {
    pub fn new(root: impl AsRef<Path>, config: &ProjectConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            return Err(IndexerError::InvalidPath(format!(
                "path does not exist: {}",
                root.display()
            )));
        }
        let overrides = &config.overrides;
        Ok(Self {
            root,
            base_extensions: lower_set(&config.base_extensions),
            base_exclude_dirs: lower_set(&config.base_exclude_dirs),
            add_extensions: lower_set(&overrides.add_extensions),
            remove_extensions: lower_set(&overrides.remove_extensions),
            add_include_dirs: normalize_dirs(&overrides.add_include_dirs),
            add_exclude_dirs: normalize_dirs(&overrides.add_exclude_dirs),
            force_include: build_globset(&overrides.force_include_patterns)?,
            force_exclude: build_globset(&overrides.force_exclude_patterns)?,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the repository, honoring `.gitignore`, and return the relative
    /// paths that pass the filter rules, sorted.
    pub fn walk(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("Failed to read entry: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let rel_str = normalize_path(relative);
            if self.is_included(&rel_str) {
                files.push(PathBuf::from(rel_str));
            }
        }

        files.sort();
        log::info!("Walker selected {} files under {}", files.len(), self.root.display());
        Ok(files)
    }

    /// Apply the precedence rules to one relative path.
    #[must_use]
    pub fn is_included(&self, rel_path: &str) -> bool {
        let rel_path = rel_path.trim_start_matches("./");

        // The metadata dir and .git internals are never indexable.
        if first_component(rel_path) == Some(META_DIR) || first_component(rel_path) == Some(".git")
        {
            return false;
        }

        if glob_matches_path_or_ancestor(&self.force_exclude, rel_path) {
            return false;
        }
        if glob_matches_path_or_ancestor(&self.force_include, rel_path) {
            return true;
        }

        let extension = extension_of(rel_path);
        if let Some(ext) = &extension {
            if self.remove_extensions.contains(ext) {
                return false;
            }
            if self.add_extensions.contains(ext) {
                return true;
            }
        }

        if dir_rules_match(&self.add_exclude_dirs, rel_path) {
            return false;
        }
        if dir_rules_match(&self.add_include_dirs, rel_path) {
            return true;
        }

        // Base decision: excluded dirs first, then the extension set.
        for component in rel_path.split('/').rev().skip(1) {
            if self.base_exclude_dirs.contains(&component.to_ascii_lowercase()) {
                return false;
            }
        }
        extension.is_some_and(|ext| self.base_extensions.contains(&ext))
    }
}

fn lower_set(values: &[String]) -> HashSet<String> {
    values.iter().map(|v| v.to_ascii_lowercase()).collect()
}

fn normalize_dirs(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim_matches('/').replace('\\', "/"))
        .filter(|v| !v.is_empty())
        .collect()
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn extension_of(rel_path: &str) -> Option<String> {
    Path::new(rel_path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

fn first_component(rel_path: &str) -> Option<&str> {
    rel_path.split('/').next()
}

/// Build a glob set with gitwildmatch semantics: `**` spans zero or more
/// segments, `*` does not cross `/`, character classes are supported.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            continue;
        }
        let glob = GlobBuilder::new(trimmed)
            .literal_separator(true)
            .build()
            .map_err(|err| IndexerError::Other(format!("invalid pattern '{trimmed}': {err}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|err| IndexerError::Other(format!("invalid pattern set: {err}")))
}

/// A directory-shaped pattern like `**/node_modules` must match files
/// beneath the directory, so ancestors are tested too.
fn glob_matches_path_or_ancestor(set: &GlobSet, rel_path: &str) -> bool {
    if set.is_empty() {
        return false;
    }
    if set.is_match(rel_path) {
        return true;
    }
    let mut end = rel_path.len();
    while let Some(pos) = rel_path[..end].rfind('/') {
        if set.is_match(&rel_path[..pos]) {
            return true;
        }
        end = pos;
    }
    false
}

/// Directory rules: a bare name matches any path component; a `a/b` form
/// matches as a relative-path prefix.
fn dir_rules_match(rules: &[String], rel_path: &str) -> bool {
    for rule in rules {
        if rule.contains('/') {
            if rel_path == rule || rel_path.starts_with(&format!("{rule}/")) {
                return true;
            }
        } else {
            let mut components: Vec<&str> = rel_path.split('/').collect();
            components.pop();
            if components.iter().any(|c| c.eq_ignore_ascii_case(rule)) {
                return true;
            }
        }
    }
    false
}
