//! Retrieval engine: question → retrieved chunks → generated answer.
//!
//! A query runs with the owner's conversation locked, so a concurrent clear
//! waits until the answer has been recorded. The index itself is read
//! without the owner lock; the store's generation swap guarantees a
//! complete snapshot.
//!
//! When the conversation already has turns, the follow-up question is first
//! rewritten into a standalone question by the generator (configurable via
//! `retrieval.condense_question`) and that rewritten text is embedded.

use crate::error::{KbError, KbResult};
use crate::index::VectorIndex;
use crate::ingest::load_or_repair;
use crate::models::{validate_owner, SearchHit, Turn};
use crate::service::KnowledgeBase;

/// Answer returned when the owner has nothing indexed.
pub const NO_DOCUMENTS: &str = "No documents indexed";

/// Answer `question` from `owner`'s documents and record the turn.
///
/// `session` is accepted for API compatibility and only logged;
/// conversation memory is keyed by owner.
pub async fn answer_question(
    kb: &KnowledgeBase,
    question: &str,
    owner: &str,
    session: Option<&str>,
) -> KbResult<String> {
    validate_owner(owner)?;
    if let Some(session) = session {
        tracing::debug!(owner, session, "session id does not select a separate memory");
    }

    // No conversation is created for an owner without an index.
    let index = match load_index(kb, owner).await? {
        Some(index) => index,
        None => return Ok(NO_DOCUMENTS.to_string()),
    };
    let mut turns = kb.memory.lock(owner).await;

    let search_text = if kb.config.retrieval.condense_question && !turns.is_empty() {
        condense(kb, question, &turns).await?
    } else {
        question.to_string()
    };

    let hits = search(kb, &index, &search_text).await?;
    let prompt = compose_prompt(&hits, question);
    let answer = kb.generator.answer(&prompt, &turns).await?;

    turns.push(Turn {
        question: question.to_string(),
        answer: answer.clone(),
    });
    tracing::info!(owner, hits = hits.len(), history = turns.len(), "answered question");
    Ok(answer)
}

/// The chunks most relevant to `question`, without generating an answer.
///
/// Fails with [`KbError::IndexMissing`] when the owner has no index.
pub async fn retrieve(kb: &KnowledgeBase, question: &str, owner: &str) -> KbResult<Vec<SearchHit>> {
    validate_owner(owner)?;
    let index = load_index(kb, owner)
        .await?
        .ok_or_else(|| KbError::IndexMissing(owner.to_string()))?;
    search(kb, &index, question).await
}

/// Load the owner's index, repairing it under the owner lock if it is corrupt.
async fn load_index(kb: &KnowledgeBase, owner: &str) -> KbResult<Option<VectorIndex>> {
    match kb.store.load(owner) {
        Err(KbError::CorruptIndex { .. }) => {
            let _owner_guard = kb.locks.lock(owner).await;
            load_or_repair(kb, owner).await
        }
        other => other,
    }
}

async fn search(kb: &KnowledgeBase, index: &VectorIndex, text: &str) -> KbResult<Vec<SearchHit>> {
    let query_vector = kb.embedder.embed(text).await?;
    if query_vector.len() != index.dims() {
        return Err(KbError::EmbeddingError(format!(
            "query embedding has {} dimensions but the index has {}; rebuild the index after changing the embedding model",
            query_vector.len(),
            index.dims()
        )));
    }
    Ok(index.search(&query_vector, kb.config.retrieval.top_k))
}

async fn condense(kb: &KnowledgeBase, question: &str, history: &[Turn]) -> KbResult<String> {
    let rewritten = kb
        .generator
        .answer(&condense_prompt(history, question), &[])
        .await?;
    let rewritten = rewritten.trim();
    if rewritten.is_empty() {
        Ok(question.to_string())
    } else {
        tracing::debug!(original = question, standalone = rewritten, "condensed question");
        Ok(rewritten.to_string())
    }
}

fn condense_prompt(history: &[Turn], question: &str) -> String {
    let mut prompt = String::from(
        "Rewrite the follow-up question so it can be understood without the conversation. \
         Reply with the question only.\n\nConversation:\n",
    );
    for turn in history {
        prompt.push_str(&format!("User: {}\nAssistant: {}\n", turn.question, turn.answer));
    }
    prompt.push_str(&format!("\nFollow-up question: {}\nStandalone question:", question));
    prompt
}

fn compose_prompt(hits: &[SearchHit], question: &str) -> String {
    let mut prompt = String::from(
        "Answer the question using the context below. \
         If the context does not contain the answer, say that you don't know.\n\nContext:\n",
    );
    for hit in hits {
        prompt.push_str(&format!(
            "[{} #{}]\n{}\n\n",
            hit.chunk.source_file, hit.chunk.ordinal, hit.chunk.text
        ));
    }
    prompt.push_str(&format!("Question: {}", question));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn hit(text: &str, ordinal: usize) -> SearchHit {
        SearchHit {
            chunk: Chunk {
                text: text.to_string(),
                source_file: "notes.txt".to_string(),
                ordinal,
            },
            score: 0.9,
        }
    }

    #[test]
    fn test_compose_prompt_includes_context_in_rank_order() {
        let prompt = compose_prompt(&[hit("first", 2), hit("second", 0)], "what?");
        let first = prompt.find("first").unwrap();
        let second = prompt.find("second").unwrap();
        assert!(first < second);
        assert!(prompt.contains("[notes.txt #2]"));
        assert!(prompt.ends_with("Question: what?"));
    }

    #[test]
    fn test_condense_prompt_lists_history() {
        let history = vec![Turn {
            question: "Who wrote it?".into(),
            answer: "Ada.".into(),
        }];
        let prompt = condense_prompt(&history, "When?");
        assert!(prompt.contains("User: Who wrote it?\nAssistant: Ada."));
        assert!(prompt.contains("Follow-up question: When?"));
    }
}
