//! Retrieval query planning with a bounded retry ladder
//!
//! The external agentic service does the heavy lifting: it decomposes the
//! question into subqueries, searches in parallel, reranks, and synthesizes an
//! answer. The planner's added value is the retry ladder on empty results
//! (literal -> simplified -> expanded, at most three attempts), a trace of
//! every attempt, and the mapping of returned passages back onto chunk and
//! document identifiers owned by this system.

use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::timeout;

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::providers::{AnswerDisposition, RetrievalOutput, RetrievalService};
use crate::storage::PipelineDb;
use crate::types::{QueryForm, QueryOutcome, QueryRequest, QueryResponse, RetrievalAttempt};

use super::citation::resolve_citations;

/// All-caps acronym token, 2-6 characters, optionally with digits
static ACRONYM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9]{1,5}$").expect("valid regex"));

/// Jargon modifier like "132kV" or "50Hz"
static UNIT_MODIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+[a-zA-Z]+$").expect("valid regex"));

/// Query planner in front of the agentic retrieval service
pub struct QueryPlanner {
    db: Arc<PipelineDb>,
    retrieval: Arc<dyn RetrievalService>,
    config: RetrievalConfig,
}

impl QueryPlanner {
    pub fn new(
        db: Arc<PipelineDb>,
        retrieval: Arc<dyn RetrievalService>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            db,
            retrieval,
            config,
        }
    }

    /// Answer a question against a project's knowledge base
    ///
    /// Empty results are retried once with a simplified query and once more
    /// with an expanded query; after that, "not found" is returned as a valid
    /// answer state. Every attempt lands in the activity trace.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let call_timeout = Duration::from_secs(self.config.timeout_secs);

        let mut ladder = vec![(QueryForm::Literal, request.question.clone())];
        let simplified = simplify_query(&request.question);
        if simplified != request.question {
            ladder.push((QueryForm::Simplified, simplified));
        }
        let expanded = self.expand_query(&request.question);
        if expanded != request.question {
            ladder.push((QueryForm::Expanded, expanded));
        }

        let mut activity: Vec<RetrievalAttempt> = Vec::new();
        let mut winner: Option<RetrievalOutput> = None;

        for (form, query) in ladder {
            let attempt_no = activity.len() as u32 + 1;
            tracing::debug!(attempt = attempt_no, ?form, %query, "retrieval attempt");

            let output = match timeout(
                call_timeout,
                self.retrieval
                    .retrieve(&request.project_id, &query, &request.history),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::external(
                        self.retrieval.name(),
                        format!("retrieval timed out after {}s", call_timeout.as_secs()),
                    ))
                }
            };

            activity.push(RetrievalAttempt {
                attempt: attempt_no,
                form,
                query,
                subqueries: output.subqueries.clone(),
                passages_returned: output.passages.len(),
            });

            if !output.passages.is_empty() || output.disposition == AnswerDisposition::Excluded {
                winner = Some(output);
                break;
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let Some(output) = winner else {
            tracing::info!(
                question = %request.question,
                attempts = activity.len(),
                "no passages after full retry ladder"
            );
            return Ok(QueryResponse::not_found(activity, elapsed_ms));
        };

        let citations = resolve_citations(&self.db, &output.passages)?;
        let outcome = match output.disposition {
            AnswerDisposition::Excluded => QueryOutcome::ExplicitlyExcluded,
            _ => QueryOutcome::Answered,
        };

        Ok(QueryResponse {
            outcome,
            answer: output.answer,
            citations,
            activity,
            processing_time_ms: elapsed_ms,
        })
    }

    /// Expanded query: first matching synonym rule appends its hints
    fn expand_query(&self, query: &str) -> String {
        let lower = query.to_lowercase();
        for rule in &self.config.synonyms {
            if lower.contains(&rule.term.to_lowercase()) && !rule.hints.is_empty() {
                return format!("{} OR {}", query, rule.hints.join(" OR "));
            }
        }
        format!("{} OR control OR monitoring OR system", query)
    }
}

/// Simplified query: acronyms and unit-style modifiers stripped
///
/// "OSS SCADA interface requirements" becomes "interface requirements".
/// Returns the original query when stripping would change nothing or leave
/// nothing behind.
pub(crate) fn simplify_query(query: &str) -> String {
    let kept: Vec<&str> = query
        .split_whitespace()
        .filter(|token| {
            let bare = token.trim_matches(|c: char| !c.is_alphanumeric());
            !(ACRONYM.is_match(bare) || UNIT_MODIFIER.is_match(bare))
        })
        .collect();

    let simplified = kept.join(" ");
    if simplified.is_empty() || simplified == query {
        query.to_string()
    } else {
        simplified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockRetrievalService;
    use crate::providers::RetrievedPassage;
    use crate::types::{chunk_id, Chunk, DocumentRecord};

    fn seeded_db() -> (Arc<PipelineDb>, Chunk) {
        let db = Arc::new(PipelineDb::in_memory().unwrap());
        let mut doc = DocumentRecord::new("proj", "SCADA_Spec.pdf", 10, chrono::Utc::now());
        doc.content_hash = "cafe0123aa55bb66".to_string();
        db.upsert_document(&doc).unwrap();
        let chunk = Chunk {
            id: chunk_id(&doc.content_hash, 4),
            document_id: doc.id,
            document_hash: doc.content_hash.clone(),
            content: "The interface polls every 5 seconds.".to_string(),
            enriched_content: "Document: SCADA Spec\n\nThe interface polls every 5 seconds."
                .to_string(),
            location: "Page 12".to_string(),
            section_hierarchy: vec!["Interfaces".to_string()],
            seq: 4,
            token_count: 8,
            enriched_token_count: 14,
        };
        db.replace_document_chunks("proj", doc.id, std::slice::from_ref(&chunk))
            .unwrap();
        (db, chunk)
    }

    fn answer_with(chunk: &Chunk) -> RetrievalOutput {
        RetrievalOutput {
            answer: "It polls every 5 seconds.".to_string(),
            passages: vec![RetrievedPassage {
                chunk_id: chunk.id.clone(),
                content: chunk.content.clone(),
                relevance: 0.91,
            }],
            subqueries: vec!["polling interval".to_string()],
            disposition: AnswerDisposition::Grounded,
        }
    }

    fn planner(db: Arc<PipelineDb>, service: Arc<MockRetrievalService>) -> QueryPlanner {
        QueryPlanner::new(db, service, RetrievalConfig::default())
    }

    #[test]
    fn simplify_strips_acronyms_and_units() {
        assert_eq!(
            simplify_query("OSS SCADA interface requirements"),
            "interface requirements"
        );
        assert_eq!(
            simplify_query("132kV substation automation"),
            "substation automation"
        );
        // Nothing to strip: unchanged
        assert_eq!(
            simplify_query("substation automation overview"),
            "substation automation overview"
        );
        // Everything stripped: fall back to the original
        assert_eq!(simplify_query("HVDC SCADA"), "HVDC SCADA");
    }

    #[tokio::test]
    async fn first_attempt_success_is_a_single_attempt() {
        let (db, chunk) = seeded_db();
        let service = Arc::new(MockRetrievalService::new());
        service.push_response(answer_with(&chunk));

        let response = planner(db, service.clone())
            .query(&QueryRequest::new("proj", "What is the SCADA polling interval?"))
            .await
            .unwrap();

        assert_eq!(response.outcome, QueryOutcome::Answered);
        assert_eq!(response.activity.len(), 1);
        assert_eq!(response.activity[0].form, QueryForm::Literal);
        assert_eq!(response.citations.len(), 1);
        assert_eq!(response.citations[0].filename, "SCADA_Spec.pdf");
        assert_eq!(response.citations[0].location, "Page 12");
        assert_eq!(service.queries().len(), 1);
    }

    #[tokio::test]
    async fn ladder_runs_three_attempts_and_answers_from_the_expanded_form() {
        let (db, chunk) = seeded_db();
        let service = Arc::new(MockRetrievalService::new());
        service.push_empty();
        service.push_empty();
        service.push_response(answer_with(&chunk));

        let response = planner(db, service.clone())
            .query(&QueryRequest::new("proj", "OSS SCADA interface requirements"))
            .await
            .unwrap();

        assert_eq!(response.outcome, QueryOutcome::Answered);
        assert_eq!(response.answer, "It polls every 5 seconds.");
        assert_eq!(response.activity.len(), 3);
        assert_eq!(
            response
                .activity
                .iter()
                .map(|a| a.form)
                .collect::<Vec<_>>(),
            vec![QueryForm::Literal, QueryForm::Simplified, QueryForm::Expanded]
        );
        assert_eq!(response.activity[0].passages_returned, 0);
        assert_eq!(response.activity[1].passages_returned, 0);
        assert_eq!(response.activity[2].passages_returned, 1);

        let queries = service.queries();
        assert_eq!(queries[0], "OSS SCADA interface requirements");
        assert_eq!(queries[1], "interface requirements");
        assert!(queries[2].contains(" OR "));
        assert!(queries[2].starts_with("OSS SCADA interface requirements"));
    }

    #[tokio::test]
    async fn empty_after_full_ladder_is_not_found_not_an_error() {
        let (db, _) = seeded_db();
        let service = Arc::new(MockRetrievalService::new());
        service.push_empty();
        service.push_empty();
        service.push_empty();

        let response = planner(db, service.clone())
            .query(&QueryRequest::new("proj", "OSS SCADA interface requirements"))
            .await
            .unwrap();

        assert_eq!(response.outcome, QueryOutcome::NotFound);
        assert!(response.citations.is_empty());
        assert_eq!(response.activity.len(), 3);
        // No fourth call past the bounded ladder
        assert_eq!(service.queries().len(), 3);
    }

    #[tokio::test]
    async fn query_without_strippable_tokens_skips_the_simplified_rung() {
        let (db, _) = seeded_db();
        let service = Arc::new(MockRetrievalService::new());
        service.push_empty();
        service.push_empty();

        let response = planner(db, service.clone())
            .query(&QueryRequest::new("proj", "substation automation overview"))
            .await
            .unwrap();

        assert_eq!(response.outcome, QueryOutcome::NotFound);
        assert_eq!(
            response
                .activity
                .iter()
                .map(|a| a.form)
                .collect::<Vec<_>>(),
            vec![QueryForm::Literal, QueryForm::Expanded]
        );
    }

    #[tokio::test]
    async fn excluded_disposition_is_surfaced_as_its_own_outcome() {
        let (db, chunk) = seeded_db();
        let service = Arc::new(MockRetrievalService::new());
        service.push_response(RetrievalOutput {
            answer: "The specification states remote control is excluded from scope.".to_string(),
            passages: vec![RetrievedPassage {
                chunk_id: chunk.id.clone(),
                content: chunk.content.clone(),
                relevance: 0.77,
            }],
            subqueries: Vec::new(),
            disposition: AnswerDisposition::Excluded,
        });

        let response = planner(db, service)
            .query(&QueryRequest::new("proj", "Is remote control required?"))
            .await
            .unwrap();

        assert_eq!(response.outcome, QueryOutcome::ExplicitlyExcluded);
        assert_eq!(response.citations.len(), 1);
    }
}
