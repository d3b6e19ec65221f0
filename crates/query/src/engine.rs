use crate::branch::{commit_blob_set, BranchContext};
use crate::cache::{CacheConfig, PayloadCache};
use crate::error::{QueryError, Result};
use crate::filters::{PathPredicate, QueryFilters};
use crate::fusion::{fuse, FusionCandidate};
use crate::truncate::truncate_payload;
use cidx_embedding::EmbeddingProvider;
use cidx_fts::FtsHit;
use cidx_vector_store::{keys, CollectionStore, Payload, SearchOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Payload `type` values that regular temporal searches return.
const TEMPORAL_PRIMARY_TYPE: &str = "file_chunk";

/// Paths the engine reads; the daemon resolves them per project and
/// (provider, model) fingerprint.
#[derive(Debug, Clone)]
pub struct QueryEngineConfig {
    pub root: PathBuf,
    pub semantic_collection: PathBuf,
    pub temporal_collection: PathBuf,
    pub fts_dir: PathBuf,
    pub cache: CacheConfig,
}

/// One query, any kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
    #[serde(default)]
    pub filters: QueryFilters,
}

const fn default_limit() -> usize {
    10
}

impl QueryRequest {
    #[must_use]
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            min_score: None,
            filters: QueryFilters::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub path: String,
    pub score: f32,
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
    pub timing_ms: u64,
}

/// Executes semantic, full-text, hybrid and temporal queries over a
/// project's collections, applying payload filters, branch-aware result
/// filtering and large-field truncation.
pub struct QueryEngine {
    config: QueryEngineConfig,
    provider: Arc<dyn EmbeddingProvider>,
    cache: PayloadCache,
}

impl QueryEngine {
    #[must_use]
    pub fn new(config: QueryEngineConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let cache = PayloadCache::new(config.cache);
        Self {
            config,
            provider,
            cache,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &PayloadCache {
        &self.cache
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Semantic search: embed, prefilter + cosine rerank, branch filter,
    /// truncate. `min_score` is threaded through to the store verbatim.
    pub async fn semantic(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let hits = self.semantic_raw(request, request.limit * 2).await?;

        let branch = BranchContext::resolve(&self.config.root).await;
        let mut results: Vec<QueryResult> = hits
            .into_iter()
            .filter(|(_, payload)| branch.allows(payload))
            .take(request.limit)
            .map(|(score, payload)| self.finish(score, payload))
            .collect();
        results.truncate(request.limit);

        Ok(QueryResponse {
            results,
            timing_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Full-text search over the tantivy index.
    pub async fn fts(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let hits = self.fts_raw(request, request.limit * 5).await?;

        let branch = BranchContext::resolve(&self.config.root).await;
        let results: Vec<QueryResult> = hits
            .into_iter()
            .filter(|(_, payload)| branch.allows(payload))
            .take(request.limit)
            .map(|(score, payload)| self.finish(score, payload))
            .collect();

        Ok(QueryResponse {
            results,
            timing_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Hybrid search: union of semantic and FTS results with normalized
    /// score fusion and a bonus for items found by both.
    pub async fn hybrid(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let pool = request.limit.max(1) * 5;

        let semantic = self.semantic_raw(request, pool).await?;
        let fts = match self.fts_raw(request, pool).await {
            Ok(hits) => hits,
            Err(QueryError::CollectionMissing(_)) => {
                log::warn!("Hybrid query without a full-text index; semantic only");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let semantic_candidates = semantic
            .into_iter()
            .map(|(score, payload)| FusionCandidate {
                key: fusion_key(&payload),
                score,
                payload,
            })
            .collect();
        let fts_candidates = fts
            .into_iter()
            .map(|(score, payload)| FusionCandidate {
                key: fusion_key(&payload),
                score,
                payload,
            })
            .collect();

        let branch = BranchContext::resolve(&self.config.root).await;
        let results: Vec<QueryResult> = fuse(semantic_candidates, fts_candidates)
            .into_iter()
            .filter(|(_, payload)| branch.allows(payload))
            .take(request.limit)
            .map(|(score, payload)| self.finish(score, payload))
            .collect();

        Ok(QueryResponse {
            results,
            timing_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Temporal search over the git-history collection. `at_commit`
    /// restricts results to blobs in that commit's tree; `time_range`
    /// filters by commit date. Branch filtering does not apply.
    pub async fn temporal(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let query = validated_query(&request.query)?;
        let predicate = PathPredicate::compile(&request.filters)?;

        let at_commit_blobs = match &request.filters.at_commit {
            Some(commit) => Some(
                commit_blob_set(&self.config.root, commit)
                    .await
                    .ok_or_else(|| {
                        QueryError::InvalidQuery(format!("unknown commit '{commit}'"))
                    })?,
            ),
            None => None,
        };
        let time_range = match &request.filters.time_range {
            Some(range) => Some((parse_when(&range.start)?, parse_when(&range.end)?)),
            None => None,
        };

        let query_vec = self.provider.embed(&query).await?;
        let dir = self.config.temporal_collection.clone();
        let limit = request.limit;
        let min_score = request.min_score;

        let hits = tokio::task::spawn_blocking(move || -> Result<Vec<(f32, Payload)>> {
            let store = CollectionStore::open(&dir)?;
            let filter = move |payload: &Payload| -> bool {
                if payload.get_str(keys::TYPE) != Some(TEMPORAL_PRIMARY_TYPE) {
                    return false;
                }
                if !predicate.matches_payload(payload) {
                    return false;
                }
                if let Some(blobs) = &at_commit_blobs {
                    let Some(blob) = payload.get_str(keys::BLOB_HASH) else {
                        return false;
                    };
                    if !blobs.contains(blob) {
                        return false;
                    }
                }
                if let Some((start, end)) = &time_range {
                    let Some(date) = payload
                        .get_str(keys::COMMIT_DATE)
                        .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
                    else {
                        return false;
                    };
                    if date < *start || date > *end {
                        return false;
                    }
                }
                true
            };
            let hits = store.search(
                &query_vec,
                limit,
                Some(&filter),
                SearchOptions {
                    score_threshold: min_score,
                },
            )?;
            Ok(hits.into_iter().map(|h| (h.score, h.payload)).collect())
        })
        .await
        .map_err(|err| QueryError::Internal(format!("join temporal search: {err}")))??;

        let results = hits
            .into_iter()
            .map(|(score, payload)| self.finish(score, payload))
            .collect();

        Ok(QueryResponse {
            results,
            timing_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Fetch a page of a cached large field.
    pub fn cache_page(&self, handle: &str, page: usize) -> Result<crate::cache::CachePage> {
        self.cache.retrieve(handle, page)
    }

    async fn semantic_raw(
        &self,
        request: &QueryRequest,
        fetch: usize,
    ) -> Result<Vec<(f32, Payload)>> {
        let query = validated_query(&request.query)?;
        let predicate = PathPredicate::compile(&request.filters)?;
        let query_vec = self.provider.embed(&query).await?;

        let dir = self.config.semantic_collection.clone();
        let min_score = request.min_score;
        let fetch = fetch.max(1);

        tokio::task::spawn_blocking(move || -> Result<Vec<(f32, Payload)>> {
            let store = CollectionStore::open(&dir)?;
            let filter = move |payload: &Payload| predicate.matches_payload(payload);
            let hits = store.search(
                &query_vec,
                fetch,
                Some(&filter),
                SearchOptions {
                    // min_score passes through untouched; Some(0.0) stays a
                    // real threshold.
                    score_threshold: min_score,
                },
            )?;
            Ok(hits.into_iter().map(|h| (h.score, h.payload)).collect())
        })
        .await
        .map_err(|err| QueryError::Internal(format!("join semantic search: {err}")))?
    }

    async fn fts_raw(
        &self,
        request: &QueryRequest,
        fetch: usize,
    ) -> Result<Vec<(f32, Payload)>> {
        let query = validated_query(&request.query)?;
        let predicate = PathPredicate::compile(&request.filters)?;
        if !cidx_fts::FtsIndex::meta_exists(&self.config.fts_dir) {
            return Err(QueryError::CollectionMissing(format!(
                "no full-text index at {}",
                self.config.fts_dir.display()
            )));
        }

        let matcher = ContentMatcher::compile(
            &query,
            request.filters.case_sensitive,
            request.filters.regex,
        )?;
        let search_query = if request.filters.regex {
            literal_tokens(&query).ok_or_else(|| {
                QueryError::InvalidQuery(
                    "regex pattern needs at least one literal token".to_string(),
                )
            })?
        } else {
            query.clone()
        };

        let dir = self.config.fts_dir.clone();
        let language = request.filters.language.clone();
        let hits = tokio::task::spawn_blocking(move || cidx_fts::search_index(&dir, &search_query, fetch))
            .await
            .map_err(|err| QueryError::Internal(format!("join fts search: {err}")))??;

        let mut out = Vec::new();
        for hit in hits {
            if !predicate.matches_path(&hit.path) {
                continue;
            }
            if let Some(wanted) = &language {
                if !hit
                    .language
                    .as_deref()
                    .is_some_and(|l| l.eq_ignore_ascii_case(wanted))
                {
                    continue;
                }
            }
            if !matcher.matches(&hit.content) {
                continue;
            }
            out.push((hit.score, fts_payload(&hit, &matcher)));
        }
        Ok(out)
    }

    fn finish(&self, score: f32, mut payload: Payload) -> QueryResult {
        let path = payload.path_or_file_path().unwrap_or_default().to_string();
        truncate_payload(&mut payload, &self.cache);
        QueryResult {
            path,
            score,
            payload,
        }
    }
}

fn validated_query(query: &str) -> Result<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(QueryError::InvalidQuery("query must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

fn fusion_key(payload: &Payload) -> String {
    format!(
        "{}:{}:{}",
        payload.path_or_file_path().unwrap_or_default(),
        payload.get_u64(keys::LINE_START).unwrap_or(0),
        payload.get_u64(keys::LINE_END).unwrap_or(0)
    )
}

fn fts_payload(hit: &FtsHit, matcher: &ContentMatcher) -> Payload {
    let mut payload = Payload::new();
    payload.insert(keys::PATH, hit.path.clone());
    payload.insert(keys::CODE_SNIPPET, hit.content.clone());
    payload.insert(
        keys::MATCH_TEXT,
        matcher
            .matching_line(&hit.content)
            .unwrap_or_else(|| hit.content.lines().next().unwrap_or_default().to_string()),
    );
    if let Some(language) = &hit.language {
        payload.insert(keys::LANGUAGE, language.clone());
    }
    payload.insert(keys::LINE_START, hit.line_start);
    payload.insert(keys::LINE_END, hit.line_end);
    payload.insert(keys::TYPE, "fts_match");
    payload
}

fn parse_when(raw: &str) -> Result<chrono::DateTime<chrono::FixedOffset>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map_err(|err| QueryError::InvalidQuery(format!("bad timestamp '{raw}': {err}")))
}

/// Extract alphanumeric literals from a regex so tantivy can narrow the
/// candidate set before the real pattern runs.
fn literal_tokens(pattern: &str) -> Option<String> {
    let tokens: Vec<String> = pattern
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 3)
        .map(str::to_string)
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

/// Content predicate for FTS results: plain substring (case-insensitive
/// by default) or full regex when requested.
enum ContentMatcher {
    Substring { needle: String, case_sensitive: bool },
    Regex(regex::Regex),
}

impl ContentMatcher {
    fn compile(query: &str, case_sensitive: bool, use_regex: bool) -> Result<Self> {
        if use_regex {
            let compiled = regex::RegexBuilder::new(query)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|err| QueryError::InvalidQuery(format!("bad regex: {err}")))?;
            Ok(Self::Regex(compiled))
        } else {
            Ok(Self::Substring {
                needle: query.to_string(),
                case_sensitive,
            })
        }
    }

    fn matches(&self, content: &str) -> bool {
        match self {
            // Tokenized tantivy matches already passed term-level checks;
            // the substring pass only bites in case-sensitive mode.
            Self::Substring {
                needle,
                case_sensitive,
            } => {
                if *case_sensitive {
                    content.contains(needle.as_str())
                        || needle
                            .split_whitespace()
                            .all(|term| content.contains(term))
                } else {
                    true
                }
            }
            Self::Regex(regex) => regex.is_match(content),
        }
    }

    fn matching_line(&self, content: &str) -> Option<String> {
        match self {
            Self::Substring {
                needle,
                case_sensitive,
            } => {
                let terms: Vec<String> = if *case_sensitive {
                    needle.split_whitespace().map(str::to_string).collect()
                } else {
                    needle
                        .split_whitespace()
                        .map(str::to_ascii_lowercase)
                        .collect()
                };
                content.lines().find_map(|line| {
                    let haystack = if *case_sensitive {
                        line.to_string()
                    } else {
                        line.to_ascii_lowercase()
                    };
                    terms
                        .iter()
                        .any(|term| haystack.contains(term.as_str()))
                        .then(|| line.to_string())
                })
            }
            Self::Regex(regex) => content
                .lines()
                .find(|line| regex.is_match(line))
                .map(str::to_string),
        }
    }
}
