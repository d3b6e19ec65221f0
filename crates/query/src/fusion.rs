use cidx_vector_store::Payload;
use std::collections::HashMap;

/// Weight of each source in the hybrid score.
const SEMANTIC_WEIGHT: f32 = 0.5;
const FTS_WEIGHT: f32 = 0.5;
/// Bonus for results found by both sources.
const BOTH_BONUS: f32 = 0.1;

/// A candidate entering fusion, keyed so the same chunk found by both
/// sources merges into one result.
pub struct FusionCandidate {
    pub key: String,
    pub score: f32,
    pub payload: Payload,
}

/// Fuse semantic and full-text candidates: min-max normalize each list,
/// combine `0.5 * semantic + 0.5 * fts`, and boost items present in both.
/// Returns (fused_score, payload) sorted descending.
pub fn fuse(
    semantic: Vec<FusionCandidate>,
    fts: Vec<FusionCandidate>,
) -> Vec<(f32, Payload)> {
    let semantic_norm = normalize(&semantic);
    let fts_norm = normalize(&fts);

    struct Merged {
        semantic: Option<f32>,
        fts: Option<f32>,
        payload: Payload,
    }

    let mut merged: HashMap<String, Merged> = HashMap::new();
    for candidate in semantic {
        let norm = semantic_norm[&candidate.key];
        merged.insert(
            candidate.key,
            Merged {
                semantic: Some(norm),
                fts: None,
                payload: candidate.payload,
            },
        );
    }
    for candidate in fts {
        let norm = fts_norm[&candidate.key];
        match merged.get_mut(&candidate.key) {
            Some(existing) => {
                existing.fts = Some(norm);
                // Keep the semantic payload; it carries the full chunk
                // body. FTS-only fields merge in.
                for (key, value) in candidate.payload.0 {
                    existing.payload.0.entry(key).or_insert(value);
                }
            }
            None => {
                merged.insert(
                    candidate.key,
                    Merged {
                        semantic: None,
                        fts: Some(norm),
                        payload: candidate.payload,
                    },
                );
            }
        }
    }

    let mut fused: Vec<(f32, Payload)> = merged
        .into_values()
        .map(|entry| {
            let semantic = entry.semantic.unwrap_or(0.0);
            let fts = entry.fts.unwrap_or(0.0);
            let mut score = SEMANTIC_WEIGHT * semantic + FTS_WEIGHT * fts;
            if entry.semantic.is_some() && entry.fts.is_some() {
                score += BOTH_BONUS;
            }
            (score, entry.payload)
        })
        .collect();
    fused.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

fn normalize(candidates: &[FusionCandidate]) -> HashMap<String, f32> {
    if candidates.is_empty() {
        return HashMap::new();
    }
    let min = candidates
        .iter()
        .map(|c| c.score)
        .fold(f32::INFINITY, f32::min);
    let max = candidates
        .iter()
        .map(|c| c.score)
        .fold(f32::NEG_INFINITY, f32::max);
    let span = max - min;
    candidates
        .iter()
        .map(|c| {
            let norm = if span > f32::EPSILON {
                (c.score - min) / span
            } else {
                1.0
            };
            (c.key.clone(), norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cidx_vector_store::keys;
    use pretty_assertions::assert_eq;

    fn candidate(key: &str, score: f32) -> FusionCandidate {
        let mut payload = Payload::new();
        payload.insert(keys::PATH, key);
        FusionCandidate {
            key: key.to_string(),
            score,
            payload,
        }
    }

    #[test]
    fn both_sources_beat_single_source() {
        let semantic = vec![candidate("both.rs", 0.9), candidate("sem.rs", 0.95)];
        let fts = vec![candidate("both.rs", 5.0), candidate("fts.rs", 8.0)];
        let fused = fuse(semantic, fts);

        let top_path = fused[0].1.get_str(keys::PATH).unwrap();
        // both.rs gets credit from both lists plus the presence bonus.
        assert_eq!(top_path, "both.rs");
    }

    #[test]
    fn single_candidate_normalizes_to_one() {
        let fused = fuse(vec![candidate("only.rs", 0.42)], Vec::new());
        assert_eq!(fused.len(), 1);
        assert!((fused[0].0 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_inputs_fuse_to_empty() {
        assert!(fuse(Vec::new(), Vec::new()).is_empty());
    }

    #[test]
    fn merged_payload_keeps_semantic_fields() {
        let mut semantic_payload = Payload::new();
        semantic_payload.insert(keys::PATH, "a.rs");
        semantic_payload.insert(keys::CONTENT, "full body");
        let semantic = vec![FusionCandidate {
            key: "a.rs".to_string(),
            score: 0.8,
            payload: semantic_payload,
        }];

        let mut fts_payload = Payload::new();
        fts_payload.insert(keys::PATH, "a.rs");
        fts_payload.insert(keys::MATCH_TEXT, "full");
        let fts = vec![FusionCandidate {
            key: "a.rs".to_string(),
            score: 3.0,
            payload: fts_payload,
        }];

        let fused = fuse(semantic, fts);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].1.get_str(keys::CONTENT), Some("full body"));
        assert_eq!(fused[0].1.get_str(keys::MATCH_TEXT), Some("full"));
    }
}
