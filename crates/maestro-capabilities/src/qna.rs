use async_trait::async_trait;
use std::collections::HashMap;

use maestro_core::dispatch::QnaProvider;
use maestro_core::types::ExecutionContext;

/// Keyword-matched answer provider for development and testing.
///
/// Real deployments plug in a retrieval-backed provider; the contract only
/// asks for best-effort text, so a fixed table is enough to exercise the
/// pipeline.
pub struct StaticQnaProvider {
    answers: HashMap<String, String>,
    fallback: String,
}

impl StaticQnaProvider {
    pub fn new() -> Self {
        let mut answers = HashMap::new();
        answers.insert(
            "sensitivity".to_string(),
            "A sensitivity analysis re-runs the financial model with margin deltas applied \
             to see which scenarios stay viable."
                .to_string(),
        );
        answers.insert(
            "fattibilità".to_string(),
            "L'analisi di fattibilità stima margini e tempi del progetto su un orizzonte \
             pluriennale."
                .to_string(),
        );
        Self {
            answers,
            fallback: "I don't have an answer for that yet. Try asking about a project or \
                       describe a task to run."
                .to_string(),
        }
    }

    pub fn with_answer(mut self, keyword: impl Into<String>, answer: impl Into<String>) -> Self {
        self.answers.insert(keyword.into(), answer.into());
        self
    }
}

impl Default for StaticQnaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QnaProvider for StaticQnaProvider {
    async fn answer(&self, question: &str, _ctx: &ExecutionContext) -> String {
        let lowered = question.to_lowercase();
        self.answers
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword.as_str()))
            .map(|(_, answer)| answer.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::types::Role;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("u1", "w1", Role::Viewer)
    }

    #[test]
    fn test_keyword_match_and_fallback() {
        tokio_test::block_on(async {
            let provider = StaticQnaProvider::new().with_answer("costa", "Dipende dal progetto.");

            let hit = provider.answer("Cos'è una sensitivity analysis?", &ctx()).await;
            assert!(hit.contains("sensitivity analysis"));

            let custom = provider.answer("quanto costa?", &ctx()).await;
            assert_eq!(custom, "Dipende dal progetto.");

            let miss = provider.answer("meteo di domani?", &ctx()).await;
            assert!(miss.contains("don't have an answer"));
        });
    }
}
