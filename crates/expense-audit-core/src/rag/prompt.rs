//! Prompt composition

use super::judgment::ChatMessage;
use super::Result;
use crate::model::ClaimFields;
use crate::vector::VectorSearchResult;

const QUERY_PERSONA: &str = "You are a corporate expense policy assistant. Answer the question \
using only the policy documents provided. Cite documents by their label, e.g. [Document 1]. \
If the documents do not cover the question, say so instead of guessing.";

const AUDIT_PERSONA: &str = "You are a senior expense auditor. Judge whether the reimbursement \
claim complies with the policy documents provided, citing documents by their label. Respond with \
a single JSON object: {\"decision\": \"approved\" | \"rejected\" | \"needs_review\", \
\"conclusion\": string, \"reasoning\": string}.";

/// Renders retrieved context and the subject into chat messages
#[derive(Debug, Clone, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    /// Messages for a free-form policy question
    pub fn compose_query(&self, question: &str, documents: &[VectorSearchResult]) -> Vec<ChatMessage> {
        let user = format!(
            "Policy documents:\n\n{}\n\nQuestion: {}",
            render_documents(documents),
            question.trim()
        );
        vec![ChatMessage::system(QUERY_PERSONA), ChatMessage::user(user)]
    }

    /// Messages for auditing one claim
    pub fn compose_audit(&self, claim: &ClaimFields, documents: &[VectorSearchResult]) -> Result<Vec<ChatMessage>> {
        let payload = serde_json::to_string_pretty(claim)?;
        let user = format!(
            "Policy documents:\n\n{}\n\nReimbursement claim:\n```json\n{}\n```\n\nReturn your verdict as JSON.",
            render_documents(documents),
            payload
        );
        Ok(vec![ChatMessage::system(AUDIT_PERSONA), ChatMessage::user(user)])
    }
}

fn render_documents(documents: &[VectorSearchResult]) -> String {
    if documents.is_empty() {
        return "(no relevant policy documents were found)".to_string();
    }
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "[Document {}] (category: {}, source: {}, relevance: {:.2})\n{}",
                i + 1,
                doc.category,
                doc.document_id,
                doc.score,
                doc.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
