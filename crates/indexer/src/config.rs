use crate::error::Result;
use crate::layout::ProjectLayout;
use serde::{Deserialize, Serialize};

/// Embedding generator settings; (provider, model, dimension) forms the
/// collection fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            base_url: None,
        }
    }
}

/// Per-project adjustments layered on top of the base walk rules,
/// evaluated in the documented precedence order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOverrides {
    #[serde(default)]
    pub add_extensions: Vec<String>,
    #[serde(default)]
    pub remove_extensions: Vec<String>,
    #[serde(default)]
    pub add_include_dirs: Vec<String>,
    #[serde(default)]
    pub add_exclude_dirs: Vec<String>,
    #[serde(default)]
    pub force_include_patterns: Vec<String>,
    #[serde(default)]
    pub force_exclude_patterns: Vec<String>,
}

/// Proxy projects fan commands out to child repositories instead of
/// indexing themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub proxy_mode: bool,
    #[serde(default)]
    pub children: Vec<String>,
}

fn default_base_extensions() -> Vec<String> {
    [
        "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "kt", "c", "h", "cc", "cpp", "hpp",
        "cs", "rb", "php", "swift", "scala", "sh", "sql", "html", "css", "scss", "json", "yaml",
        "yml", "toml", "xml", "md", "txt", "proto", "zig", "lua", "ex", "exs", "hs", "dart",
        "vue", "svelte",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn default_exclude_dirs() -> Vec<String> {
    [
        "node_modules",
        "target",
        "dist",
        "build",
        "out",
        "vendor",
        "venv",
        ".venv",
        "__pycache__",
        ".git",
        ".hg",
        ".svn",
        ".idea",
        ".vscode",
        ".code-indexer",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

const fn default_chunk_size() -> usize {
    1000
}

const fn default_overlap() -> usize {
    150
}

const fn default_workers() -> usize {
    4
}

const fn default_batch_files() -> usize {
    16
}

const fn default_true() -> bool {
    true
}

/// `.code-indexer/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default = "default_base_extensions")]
    pub base_extensions: Vec<String>,
    #[serde(default = "default_exclude_dirs")]
    pub base_exclude_dirs: Vec<String>,
    #[serde(default)]
    pub overrides: FilterOverrides,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default = "default_chunk_size")]
    pub chunk_size_chars: usize,
    #[serde(default = "default_overlap")]
    pub overlap_chars: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_batch_files")]
    pub batch_files: usize,
    #[serde(default = "default_true")]
    pub temporal_enabled: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            base_extensions: default_base_extensions(),
            base_exclude_dirs: default_exclude_dirs(),
            overrides: FilterOverrides::default(),
            proxy: ProxyConfig::default(),
            chunk_size_chars: default_chunk_size(),
            overlap_chars: default_overlap(),
            workers: default_workers(),
            batch_files: default_batch_files(),
            temporal_enabled: true,
        }
    }
}

impl ProjectConfig {
    pub fn load(layout: &ProjectLayout) -> Result<Self> {
        let raw = std::fs::read(layout.config_path())?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn save(&self, layout: &ProjectLayout) -> Result<()> {
        let path = layout.config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Validate and repair the config in place, returning a description of
    /// each applied fix. Used by `fix-config`.
    pub fn normalize(&mut self) -> Vec<String> {
        let mut fixes = Vec::new();
        if self.chunk_size_chars == 0 {
            self.chunk_size_chars = default_chunk_size();
            fixes.push("chunk_size_chars was 0; reset to default".to_string());
        }
        if self.overlap_chars >= self.chunk_size_chars {
            self.overlap_chars = self.chunk_size_chars / 8;
            fixes.push(format!(
                "overlap_chars exceeded chunk size; reset to {}",
                self.overlap_chars
            ));
        }
        if self.workers == 0 {
            self.workers = default_workers();
            fixes.push("workers was 0; reset to default".to_string());
        }
        if self.batch_files == 0 {
            self.batch_files = default_batch_files();
            fixes.push("batch_files was 0; reset to default".to_string());
        }
        if self.embedding.dimension == 0 {
            self.embedding = EmbeddingConfig::default();
            fixes.push("embedding dimension was 0; reset embedding config".to_string());
        }
        if self.proxy.proxy_mode && self.proxy.children.is_empty() {
            self.proxy.proxy_mode = false;
            fixes.push("proxy_mode set without children; disabled".to_string());
        }
        for ext in &mut self.overrides.add_extensions {
            if let Some(stripped) = ext.strip_prefix('.') {
                *ext = stripped.to_string();
                fixes.push(format!("normalized extension '.{ext}' to '{ext}'"));
            }
        }
        for ext in &mut self.overrides.remove_extensions {
            if let Some(stripped) = ext.strip_prefix('.') {
                *ext = stripped.to_string();
                fixes.push(format!("normalized extension '.{ext}' to '{ext}'"));
            }
        }
        fixes
    }
}
