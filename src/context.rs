//! # Context assembly
//!
//! Turns a free-text query into a relevance-filtered context block by joining
//! the similarity index with the chat archive. Read-only with respect to
//! both: assembly never mutates the index or any record, and every per-hit
//! failure (stale reference, malformed id, unreadable record) degrades to
//! skipping or down-attributing that hit instead of failing the retrieval.
//!
//! The index scores hits by squared Euclidean distance, where smaller means
//! more similar. To filter by a threshold without inverting the metric, the
//! distance is first converted to a bounded similarity score
//! `1 / (1 + distance)` in `(0, 1]`, and only hits scoring at least
//! `min_similarity` are kept.

use tracing::warn;

use crate::chat_store::ChatArchive;
use crate::vector_store::VectorStore;

/// How many index hits to consider per query.
pub const DEFAULT_TOP_K: usize = 5;

/// Builds the context block injected into each chat turn.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    pub top_k: usize,
    /// Minimum `1 / (1 + distance)` score for inclusion.
    pub min_similarity: f32,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_similarity: 0.5,
        }
    }
}

impl ContextAssembler {
    pub fn new(min_similarity: f32) -> Self {
        Self {
            min_similarity,
            ..Self::default()
        }
    }

    /// Assemble the context block for `query`.
    ///
    /// Returns lines of the form `From chat '<title>' (<speaker>): <text>`,
    /// nearest hit first, separated by blank lines. Hits whose external id
    /// does not parse are kept as unattributed lines; hits whose record is
    /// gone are dropped. The result is empty when the index is empty or no
    /// hit clears the cutoff.
    pub fn assemble(&self, query: &str, index: &VectorStore, archive: &ChatArchive) -> String {
        let hits = match index.search(query, self.top_k) {
            Ok(hits) => hits,
            Err(err) => {
                warn!("context retrieval failed: {err}");
                return String::new();
            }
        };

        let mut parts = Vec::new();

        for hit in hits {
            let similarity = 1.0 / (1.0 + hit.distance);
            if similarity < self.min_similarity {
                continue;
            }

            let Some((conversation_id, position)) = parse_external_id(&hit.external_id) else {
                warn!(id = %hit.external_id, "could not parse message id for context retrieval");
                parts.push(format!("From historical context: {}", hit.text));
                continue;
            };

            match archive.load(conversation_id) {
                Ok(Some(record)) => {
                    let speaker = record
                        .messages
                        .get(position)
                        .map(|m| m.role())
                        .unwrap_or("unknown");
                    parts.push(format!(
                        "From chat '{}' ({}): {}",
                        record.title, speaker, hit.text
                    ));
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!(id = %hit.external_id, "skipping context hit: {err}");
                    continue;
                }
            }
        }

        parts.join("\n\n")
    }
}

/// Split `"<conversation_id>:<position>"` into its halves.
fn parse_external_id(external_id: &str) -> Option<(&str, usize)> {
    let (conversation_id, position) = external_id.rsplit_once(':')?;
    if conversation_id.is_empty() {
        return None;
    }
    Some((conversation_id, position.parse().ok()?))
}
