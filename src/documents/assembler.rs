//! Answer Assembly
//!
//! Turns RBAC-filtered hits into an answer: relevance guard, grounding
//! prompt, generation, and a distance-derived confidence score.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::retriever::{RbacRetriever, RetrievalHit, RetrieverError};
use crate::config::RetrievalConfig;
use crate::generation::Generator;
use crate::rbac::Role;

/// The answer given whenever the evidence is missing or too weak
pub const NO_ANSWER: &str = "I don't know";

/// Response returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
    pub confidence: f64,
}

impl Answer {
    pub fn unknown() -> Self {
        Self {
            answer: NO_ANSWER.to_string(),
            sources: Vec::new(),
            confidence: 0.0,
        }
    }
}

/// Grounding prompt: instructions, then the context bullets, then the question.
pub fn build_prompt(query: &str, hits: &[RetrievalHit]) -> String {
    let context = hits
        .iter()
        .map(|h| format!("- {}", h.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are an internal company Q&A assistant.\n\
         \n\
         Instructions:\n\
         - Answer using ONLY the information in the context.\n\
         - Extract factual points relevant to the question.\n\
         - Do NOT add new information.\n\
         - Present the answer clearly in 3-5 bullet points.\n\
         - If the answer is not present, reply exactly: {no_answer}.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question:\n\
         {query}\n\
         \n\
         Answer:\n",
        no_answer = NO_ANSWER,
    )
}

/// `round(1 / (1 + mean distance), 2)`; 0.0 for no hits.
pub fn compute_confidence(hits: &[RetrievalHit]) -> f64 {
    if hits.is_empty() {
        return 0.0;
    }
    let avg = hits.iter().map(|h| h.distance as f64).sum::<f64>() / hits.len() as f64;
    let confidence = 1.0 / (1.0 + avg.max(0.0));
    (confidence * 100.0).round() / 100.0
}

pub struct AnswerAssembler {
    retriever: RbacRetriever,
    generator: Arc<dyn Generator>,
    config: RetrievalConfig,
}

impl AnswerAssembler {
    pub fn new(retriever: RbacRetriever, generator: Arc<dyn Generator>, config: RetrievalConfig) -> Self {
        Self {
            retriever,
            generator,
            config,
        }
    }

    pub fn retriever(&self) -> &RbacRetriever {
        &self.retriever
    }

    pub fn config(&self) -> RetrievalConfig {
        self.config
    }

    /// Answer `query` for `role`. Weak or missing evidence and generation
    /// failures degrade to [`NO_ANSWER`]; retrieval failures are errors.
    pub async fn answer(&self, query: &str, role: Role) -> Result<Answer, RetrieverError> {
        let hits = self.retriever.search(query, role, self.config.top_k).await?;

        let Some(nearest) = hits.first() else {
            info!(role = %role, "No admissible chunks");
            return Ok(Answer::unknown());
        };
        if nearest.distance > self.config.relevance_threshold {
            info!(
                role = %role,
                distance = nearest.distance,
                threshold = self.config.relevance_threshold,
                "Nearest chunk beyond relevance threshold"
            );
            return Ok(Answer::unknown());
        }

        let used = &hits[..hits.len().min(self.config.context_chunks)];
        let prompt = build_prompt(query, used);

        let answer = match self.generator.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                debug!("Generator returned empty text");
                NO_ANSWER.to_string()
            }
            Err(e) => {
                warn!(error = %e, "Generation failed");
                NO_ANSWER.to_string()
            }
        };

        let sources: BTreeSet<String> = used.iter().map(|h| h.source_document.clone()).collect();
        let confidence = compute_confidence(used);
        info!(role = %role, used = used.len(), confidence = confidence, "Answered query");

        Ok(Answer {
            answer,
            sources: sources.into_iter().collect(),
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::retriever::tests::{candidate, CannedIndex, FailingEmbedder, FixedEmbedder};
    use crate::documents::retriever::DEFAULT_OVER_FETCH;
    use crate::generation::GenerationError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    struct EchoGenerator {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl EchoGenerator {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("model offline".to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.prompts.lock().push(prompt.to_string());
            self.reply.clone().map_err(GenerationError::Request)
        }
    }

    fn hit(source: &str, distance: f32) -> RetrievalHit {
        RetrievalHit {
            chunk_id: format!("{}_001", source),
            text: format!("text from {}", source),
            source_document: source.to_string(),
            department: "General".to_string(),
            distance,
        }
    }

    fn assembler(
        candidates: Vec<crate::index::IndexCandidate>,
        generator: Arc<EchoGenerator>,
    ) -> AnswerAssembler {
        let retriever = RbacRetriever::new(
            Arc::new(FixedEmbedder(vec![1.0])),
            Arc::new(CannedIndex::new(candidates)),
            DEFAULT_OVER_FETCH,
        );
        AnswerAssembler::new(retriever, generator, RetrievalConfig::default())
    }

    #[test]
    fn test_confidence_example() {
        let hits = vec![hit("a", 0.1), hit("b", 0.3), hit("c", 0.5)];
        assert_eq!(compute_confidence(&hits), 0.77);
    }

    #[test]
    fn test_confidence_zero_distance() {
        assert_eq!(compute_confidence(&[hit("a", 0.0)]), 1.0);
        assert_eq!(compute_confidence(&[]), 0.0);
    }

    #[test]
    fn test_prompt_contains_context_and_question() {
        let prompt = build_prompt("How many leave days?", &[hit("leave.md", 0.1), hit("faq.md", 0.2)]);
        assert!(prompt.contains("- text from leave.md\n- text from faq.md"));
        assert!(prompt.contains("Question:\nHow many leave days?"));
        assert!(prompt.contains("reply exactly: I don't know."));
        assert!(prompt.trim_end().ends_with("Answer:"));
    }

    #[tokio::test]
    async fn test_empty_index_is_unknown() {
        let generator = EchoGenerator::replying("- something");
        let answer = assembler(Vec::new(), generator.clone()).answer("anything", Role::CLevel).await.unwrap();
        assert_eq!(answer, Answer::unknown());
        assert!(generator.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_guard_ignores_other_hits() {
        let generator = EchoGenerator::replying("- something");
        let answer = assembler(
            vec![
                candidate("a", "a.md", "General", "Employees", 2.5),
                candidate("b", "b.md", "General", "Employees", 2.6),
            ],
            generator.clone(),
        )
        .answer("q", Role::Employees)
        .await
        .unwrap();
        assert_eq!(answer, Answer::unknown());
        assert!(generator.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let answer = assembler(
            vec![candidate("a", "a.md", "General", "Employees", 2.0)],
            EchoGenerator::replying("- yes"),
        )
        .answer("q", Role::Employees)
        .await
        .unwrap();
        assert_eq!(answer.answer, "- yes");
    }

    #[tokio::test]
    async fn test_unauthorized_hits_yield_unknown() {
        let answer = assembler(
            vec![candidate("f", "fin.md", "Finance", "Finance,C-Level", 0.1)],
            EchoGenerator::replying("- secret"),
        )
        .answer("revenue", Role::Employees)
        .await
        .unwrap();
        assert_eq!(answer, Answer::unknown());
    }

    #[tokio::test]
    async fn test_uses_top_three_only() {
        let generator = EchoGenerator::replying("- point one\n- point two\n- point three");
        let answer = assembler(
            vec![
                candidate("a", "a.md", "General", "Employees", 0.1),
                candidate("b", "b.md", "General", "Employees", 0.3),
                candidate("c", "a.md", "General", "Employees", 0.5),
                candidate("d", "d.md", "General", "Employees", 1.5),
                candidate("e", "e.md", "General", "Employees", 1.9),
            ],
            generator.clone(),
        )
        .answer("q", Role::Employees)
        .await
        .unwrap();

        assert_eq!(answer.confidence, 0.77);
        assert_eq!(answer.sources, vec!["a.md".to_string(), "b.md".to_string()]);
        let prompt = generator.prompts.lock()[0].clone();
        assert!(prompt.contains("text of c"));
        assert!(!prompt.contains("text of d"));
    }

    #[tokio::test]
    async fn test_generation_failure_is_unknown_answer() {
        let answer = assembler(
            vec![candidate("a", "a.md", "General", "Employees", 0.0)],
            EchoGenerator::failing(),
        )
        .answer("q", Role::Employees)
        .await
        .unwrap();
        assert_eq!(answer.answer, NO_ANSWER);
        assert_eq!(answer.confidence, 1.0);
        assert_eq!(answer.sources, vec!["a.md".to_string()]);
    }

    #[tokio::test]
    async fn test_blank_generation_is_unknown_answer() {
        let answer = assembler(
            vec![candidate("a", "a.md", "General", "Employees", 0.2)],
            EchoGenerator::replying("   \n"),
        )
        .answer("q", Role::Employees)
        .await
        .unwrap();
        assert_eq!(answer.answer, NO_ANSWER);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_error() {
        let retriever = RbacRetriever::new(
            Arc::new(FailingEmbedder),
            Arc::new(CannedIndex::new(Vec::new())),
            DEFAULT_OVER_FETCH,
        );
        let assembler = AnswerAssembler::new(retriever, EchoGenerator::replying("x"), RetrievalConfig::default());
        assert!(assembler.answer("q", Role::Hr).await.is_err());
    }

    proptest! {
        #[test]
        fn prop_confidence_non_increasing(a in 0.0f32..10.0, b in 0.0f32..10.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let c_lo = compute_confidence(&[hit("x", lo)]);
            let c_hi = compute_confidence(&[hit("x", hi)]);
            prop_assert!(c_lo >= c_hi);
            prop_assert!((0.0..=1.0).contains(&c_lo));
        }
    }
}
