use crate::cache::PayloadCache;
use cidx_vector_store::Payload;
use unicode_segmentation::UnicodeSegmentation;

/// Fields whose bodies are truncated into the payload cache.
const LARGE_FIELDS: &[&str] = &["content", "code_snippet", "match_text"];
/// Fields truncated inside temporal evolution entries.
const EVOLUTION_FIELDS: &[&str] = &["content", "diff"];

/// Apply the large-field truncation rules to one result payload, after all
/// filtering and immediately before returning.
///
/// For each large field longer than the configured preview size, the field
/// is replaced by `<field>_preview`, `<field>_cache_handle`,
/// `<field>_has_more` and `<field>_total_size`; the full body moves into
/// the cache under an independent handle per field.
pub fn truncate_payload(payload: &mut Payload, cache: &PayloadCache) {
    let preview_size = cache.config().preview_size;
    for field in LARGE_FIELDS {
        truncate_field(payload, field, preview_size, cache);
    }

    // Temporal evolution entries get the same treatment for their content
    // and diff fields.
    if let Some(serde_json::Value::Array(entries)) = payload.remove("evolution") {
        let truncated: Vec<serde_json::Value> = entries
            .into_iter()
            .map(|entry| match entry {
                serde_json::Value::Object(map) => {
                    let mut entry_payload = Payload::from(map);
                    for field in EVOLUTION_FIELDS {
                        truncate_field(&mut entry_payload, field, preview_size, cache);
                    }
                    serde_json::Value::Object(entry_payload.0)
                }
                other => other,
            })
            .collect();
        payload.insert("evolution", truncated);
    }
}

fn truncate_field(payload: &mut Payload, field: &str, preview_size: usize, cache: &PayloadCache) {
    let Some(serde_json::Value::String(body)) = payload.get(field).cloned() else {
        return;
    };
    let total_size = body.chars().count();
    if total_size <= preview_size {
        return;
    }

    let preview = grapheme_prefix(&body, preview_size);
    let handle = cache.store(body);
    payload.remove(field);
    payload.insert(&format!("{field}_preview"), preview);
    payload.insert(&format!("{field}_cache_handle"), handle);
    payload.insert(&format!("{field}_has_more"), true);
    payload.insert(&format!("{field}_total_size"), total_size as u64);
}

/// First `count` characters, extended to a grapheme boundary so the
/// preview never ends inside a combining sequence.
fn grapheme_prefix(body: &str, count: usize) -> String {
    let mut taken = 0usize;
    let mut end = 0usize;
    for (idx, grapheme) in body.grapheme_indices(true) {
        if taken >= count {
            end = idx;
            break;
        }
        taken += grapheme.chars().count();
        end = idx + grapheme.len();
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use cidx_vector_store::keys;
    use pretty_assertions::assert_eq;

    fn cache() -> PayloadCache {
        PayloadCache::new(CacheConfig::default())
    }

    #[test]
    fn short_fields_are_untouched() {
        let cache = cache();
        let mut payload = Payload::new();
        payload.insert(keys::CONTENT, "short content");
        truncate_payload(&mut payload, &cache);
        assert_eq!(payload.get_str(keys::CONTENT), Some("short content"));
        assert!(payload.get("content_preview").is_none());
    }

    #[test]
    fn long_content_moves_into_the_cache() {
        let cache = cache();
        let body = "x".repeat(3000);
        let mut payload = Payload::new();
        payload.insert(keys::CONTENT, body.clone());
        truncate_payload(&mut payload, &cache);

        assert!(payload.get(keys::CONTENT).is_none());
        assert_eq!(
            payload.get_str("content_preview").map(str::len),
            Some(2000)
        );
        assert_eq!(payload.get("content_has_more"), Some(&serde_json::json!(true)));
        assert_eq!(payload.get_u64("content_total_size"), Some(3000));

        let handle = payload.get_str("content_cache_handle").unwrap();
        let page = cache.retrieve(handle, 0).unwrap();
        assert_eq!(page.content, body);
        assert!(!page.has_more);
    }

    #[test]
    fn each_field_gets_an_independent_handle() {
        let cache = cache();
        let mut payload = Payload::new();
        payload.insert(keys::CODE_SNIPPET, "a".repeat(2500));
        payload.insert(keys::MATCH_TEXT, "b".repeat(2500));
        truncate_payload(&mut payload, &cache);

        let snippet_handle = payload.get_str("code_snippet_cache_handle").unwrap();
        let match_handle = payload.get_str("match_text_cache_handle").unwrap();
        assert_ne!(snippet_handle, match_handle);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evolution_entries_are_truncated_too() {
        let cache = cache();
        let mut payload = Payload::new();
        payload.insert(
            "evolution",
            serde_json::json!([
                {"commit_hash": "abc", "content": "y".repeat(2500), "diff": "short"},
            ]),
        );
        truncate_payload(&mut payload, &cache);

        let entries = payload.get("evolution").unwrap().as_array().unwrap();
        let entry = entries[0].as_object().unwrap();
        assert!(entry.get("content").is_none());
        assert_eq!(
            entry["content_preview"].as_str().map(str::len),
            Some(2000)
        );
        assert_eq!(entry["diff"].as_str(), Some("short"));
    }

    #[test]
    fn preview_respects_grapheme_boundaries() {
        let cache = PayloadCache::new(CacheConfig {
            preview_size: 3,
            ..CacheConfig::default()
        });
        let mut payload = Payload::new();
        // 4th char is a combining accent on the 3rd.
        payload.insert(keys::CONTENT, "abe\u{301}xyzmore".to_string());
        truncate_payload(&mut payload, &cache);
        let preview = payload.get_str("content_preview").unwrap();
        // The accent travels with its base character.
        assert!(preview.starts_with("abe\u{301}") || preview == "ab");
    }
}
