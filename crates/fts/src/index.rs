use crate::error::{FtsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexWriter, TantivyDocument, Term};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// A document fed to the full-text index, one per chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsDocument {
    pub path: String,
    pub content: String,
    pub language: Option<String>,
    pub line_start: u64,
    pub line_end: u64,
}

/// A full-text match with its stored fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsHit {
    pub path: String,
    pub content: String,
    pub language: Option<String>,
    pub line_start: u64,
    pub line_end: u64,
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
struct Fields {
    path: Field,
    content: Field,
    language: Field,
    line_start: Field,
    line_end: Field,
}

/// Tantivy-backed lexical index. Single writer, parallel readers; the
/// writer commits explicitly so interrupted sessions keep their last
/// committed state.
pub struct FtsIndex {
    index: Index,
    writer: Mutex<IndexWriter>,
    fields: Fields,
    dir: PathBuf,
}

impl FtsIndex {
    /// True when an index already exists at `dir`, meaning deltas can be
    /// applied instead of a full rebuild.
    #[must_use]
    pub fn meta_exists(dir: &Path) -> bool {
        dir.join("meta.json").exists()
    }

    pub fn open_or_create(dir: &Path) -> Result<Self> {
        let schema = build_schema();
        let index = if Self::meta_exists(dir) {
            Index::open_in_dir(dir)?
        } else {
            std::fs::create_dir_all(dir)?;
            Index::create_in_dir(dir, schema.clone())?
        };

        let fields = resolve_fields(&index.schema())?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;

        Ok(Self {
            index,
            writer: Mutex::new(writer),
            fields,
            dir: dir.to_path_buf(),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn add_document(&self, document: &FtsDocument) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| FtsError::Index("writer lock poisoned".to_string()))?;
        writer.add_document(doc!(
            self.fields.path => document.path.clone(),
            self.fields.content => document.content.clone(),
            self.fields.language => document.language.clone().unwrap_or_default(),
            self.fields.line_start => document.line_start,
            self.fields.line_end => document.line_end,
        ))?;
        Ok(())
    }

    /// Remove every chunk document for a file path.
    pub fn delete_for_path(&self, path: &str) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| FtsError::Index("writer lock poisoned".to_string()))?;
        writer.delete_term(Term::from_field_text(self.fields.path, path));
        Ok(())
    }

    /// Drop all documents; used by clear mode before a full rebuild.
    pub fn clear(&self) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| FtsError::Index("writer lock poisoned".to_string()))?;
        writer.delete_all_documents()?;
        writer.commit()?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| FtsError::Index("writer lock poisoned".to_string()))?;
        writer.commit()?;
        Ok(())
    }

    pub fn doc_count(&self) -> Result<u64> {
        let reader = self.index.reader()?;
        Ok(reader.searcher().num_docs())
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(FtsError::InvalidQuery("query must not be empty".to_string()));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let reader = self.index.reader()?;
        let searcher = reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.fields.content]);
        let parsed = parser
            .parse_query(trimmed)
            .map_err(|err| FtsError::InvalidQuery(err.to_string()))?;

        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let retrieved: TantivyDocument = searcher.doc(address)?;
            let path = first_str(&retrieved, self.fields.path);
            let content = first_str(&retrieved, self.fields.content);
            let language = {
                let raw = first_str(&retrieved, self.fields.language);
                if raw.is_empty() {
                    None
                } else {
                    Some(raw)
                }
            };
            hits.push(FtsHit {
                path,
                content,
                language,
                line_start: first_u64(&retrieved, self.fields.line_start),
                line_end: first_u64(&retrieved, self.fields.line_end),
                score,
            });
        }
        Ok(hits)
    }
}

/// Read-only document count that never takes the writer lock.
pub fn doc_count_in_dir(dir: &Path) -> Result<u64> {
    if !FtsIndex::meta_exists(dir) {
        return Ok(0);
    }
    let index = Index::open_in_dir(dir)?;
    let reader = index.reader()?;
    Ok(reader.searcher().num_docs())
}

/// Read-only search that never takes the writer lock; safe to call while
/// an indexing session holds the writer.
pub fn search_index(dir: &Path, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(FtsError::InvalidQuery("query must not be empty".to_string()));
    }
    if !FtsIndex::meta_exists(dir) {
        return Err(FtsError::Index(format!(
            "no full-text index at {}",
            dir.display()
        )));
    }

    let index = Index::open_in_dir(dir)?;
    let fields = resolve_fields(&index.schema())?;
    let reader = index.reader()?;
    let searcher = reader.searcher();
    let parser = QueryParser::for_index(&index, vec![fields.content]);
    let parsed = parser
        .parse_query(trimmed)
        .map_err(|err| FtsError::InvalidQuery(err.to_string()))?;

    let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit.max(1)))?;
    let mut hits = Vec::with_capacity(top_docs.len());
    for (score, address) in top_docs {
        let retrieved: TantivyDocument = searcher.doc(address)?;
        let language = {
            let raw = first_str(&retrieved, fields.language);
            if raw.is_empty() {
                None
            } else {
                Some(raw)
            }
        };
        hits.push(FtsHit {
            path: first_str(&retrieved, fields.path),
            content: first_str(&retrieved, fields.content),
            language,
            line_start: first_u64(&retrieved, fields.line_start),
            line_end: first_u64(&retrieved, fields.line_end),
            score,
        });
    }
    Ok(hits)
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("path", STRING | STORED);
    builder.add_text_field("content", TEXT | STORED);
    builder.add_text_field("language", STRING | STORED);
    builder.add_u64_field("line_start", STORED);
    builder.add_u64_field("line_end", STORED);
    builder.build()
}

fn resolve_fields(schema: &Schema) -> Result<Fields> {
    let field = |name: &str| {
        schema
            .get_field(name)
            .map_err(|_| FtsError::Index(format!("schema missing field '{name}'")))
    };
    Ok(Fields {
        path: field("path")?,
        content: field("content")?,
        language: field("language")?,
        line_start: field("line_start")?,
        line_end: field("line_end")?,
    })
}

fn first_str(document: &TantivyDocument, field: Field) -> String {
    document
        .get_first(field)
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string()
}

fn first_u64(document: &TantivyDocument, field: Field) -> u64 {
    document
        .get_first(field)
        .and_then(|value| value.as_u64())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample(path: &str, content: &str, language: &str) -> FtsDocument {
        FtsDocument {
            path: path.to_string(),
            content: content.to_string(),
            language: Some(language.to_string()),
            line_start: 1,
            line_end: 10,
        }
    }

    #[test]
    fn meta_exists_only_after_create() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("tantivy_index");
        assert!(!FtsIndex::meta_exists(&dir));
        let _ = FtsIndex::open_or_create(&dir).unwrap();
        assert!(FtsIndex::meta_exists(&dir));
    }

    #[test]
    fn indexed_documents_are_searchable_after_commit() {
        let tmp = TempDir::new().unwrap();
        let fts = FtsIndex::open_or_create(&tmp.path().join("fts")).unwrap();
        fts.add_document(&sample("src/auth.rs", "fn verify_token(token: &str)", "rust"))
            .unwrap();
        fts.add_document(&sample("src/db.rs", "fn open_connection(url: &str)", "rust"))
            .unwrap();
        fts.commit().unwrap();

        let hits = fts.search("token", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "src/auth.rs");
        assert_eq!(hits[0].language.as_deref(), Some("rust"));
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn delete_for_path_removes_all_chunks() {
        let tmp = TempDir::new().unwrap();
        let fts = FtsIndex::open_or_create(&tmp.path().join("fts")).unwrap();
        fts.add_document(&sample("a.rs", "alpha beta", "rust")).unwrap();
        fts.add_document(&sample("a.rs", "alpha gamma", "rust")).unwrap();
        fts.add_document(&sample("b.rs", "alpha delta", "rust")).unwrap();
        fts.commit().unwrap();
        assert_eq!(fts.doc_count().unwrap(), 3);

        fts.delete_for_path("a.rs").unwrap();
        fts.commit().unwrap();
        assert_eq!(fts.doc_count().unwrap(), 1);

        let hits = fts.search("alpha", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "b.rs");
    }

    #[test]
    fn clear_empties_the_index() {
        let tmp = TempDir::new().unwrap();
        let fts = FtsIndex::open_or_create(&tmp.path().join("fts")).unwrap();
        fts.add_document(&sample("a.rs", "something", "rust")).unwrap();
        fts.commit().unwrap();
        fts.clear().unwrap();
        assert_eq!(fts.doc_count().unwrap(), 0);
    }

    #[test]
    fn empty_query_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let fts = FtsIndex::open_or_create(&tmp.path().join("fts")).unwrap();
        assert!(matches!(
            fts.search("   ", 10),
            Err(FtsError::InvalidQuery(_))
        ));
    }

    #[test]
    fn reopen_applies_deltas_incrementally() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("fts");
        {
            let fts = FtsIndex::open_or_create(&dir).unwrap();
            fts.add_document(&sample("a.rs", "first pass", "rust")).unwrap();
            fts.commit().unwrap();
        }
        {
            let fts = FtsIndex::open_or_create(&dir).unwrap();
            fts.add_document(&sample("b.rs", "second pass", "rust")).unwrap();
            fts.commit().unwrap();
            assert_eq!(fts.doc_count().unwrap(), 2);
        }
    }
}
