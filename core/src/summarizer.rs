// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synthesizes one final reply out of a dispatch round's worker responses.

use crate::dispatch::WorkerResponse;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::process::Command;

/// The preferred local model to run the summarization pass with, tried
/// first regardless of what the fleet is currently assigned.
pub const PREFERRED_SUMMARY_MODEL: &str = "gemma3:1b";
/// Used only if no worker anywhere in the fleet has `PREFERRED_SUMMARY_MODEL`
/// or any other candidate installed.
const LAST_RESORT_MODEL: &str = "llama3.2:1b";

/// Runs a prompt through a single local model and returns its text. The
/// production implementation shells out to a local inference runtime the
/// same way a worker's backend would; tests substitute an in-memory stub.
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    /// Generate text for `prompt` using `model`.
    async fn generate(&self, model: &str, prompt: &str) -> anyhow::Result<String>;
}

/// Shells out to a local `ollama run <model>` invocation, piping the prompt
/// on stdin. This is the default `SummaryBackend` used outside of tests.
pub struct LocalSummaryBackend;

#[async_trait]
impl SummaryBackend for LocalSummaryBackend {
    async fn generate(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        let model = model.to_string();
        let prompt = prompt.to_string();
        let output = tokio::task::spawn_blocking(move || {
            use std::io::Write as _;
            let mut child = Command::new("ollama")
                .arg("run")
                .arg(&model)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .spawn()?;
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(prompt.as_bytes())?;
            }
            child.wait_with_output()
        })
        .await??;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Picks which installed model to run the summary pass with: the preferred
/// model if any worker has it installed, otherwise the most complex model
/// any worker has installed, otherwise the hardcoded last resort.
pub fn best_local_model(installed_models: &[&str]) -> String {
    if installed_models.contains(&PREFERRED_SUMMARY_MODEL) {
        return PREFERRED_SUMMARY_MODEL.to_string();
    }
    installed_models
        .iter()
        .filter_map(|id| crate::catalog::ModelDescriptor::parse(id))
        .max_by(|a, b| a.complexity_rank.cmp(&b.complexity_rank))
        .map(|model| model.identifier)
        .unwrap_or_else(|| LAST_RESORT_MODEL.to_string())
}

/// Builds the prompt fed to the summarizer: the original question followed
/// by each worker's labeled response.
fn build_summary_prompt(original_prompt: &str, responses: &[WorkerResponse]) -> String {
    let mut prompt = format!(
        "Original question: {original_prompt}\n\nThe following are independent responses from {} models. Synthesize them into one concise, accurate answer.\n\n",
        responses.len()
    );
    for (i, response) in responses.iter().enumerate() {
        let _ = write!(prompt, "--- Response {} (model: {}) ---\n{}\n\n", i + 1, response.model, response.text);
    }
    prompt
}

/// The `PROCESSING_DETAILS_START`-delimited footer appended to every final
/// reply, grouping per-model timing stats.
fn format_processing_details(responses: &[WorkerResponse]) -> String {
    let mut by_model: HashMap<&str, Vec<u64>> = HashMap::new();
    for r in responses {
        by_model.entry(r.model.as_str()).or_default().push(r.processing_time_ms);
    }

    let mut footer = String::from("\n\nPROCESSING_DETAILS_START\n");
    let total: u64 = responses.iter().map(|r| r.processing_time_ms).sum();
    let _ = writeln!(footer, "models_used: {}", by_model.len());
    let _ = writeln!(footer, "total_responses: {}", responses.len());
    let _ = writeln!(footer, "total_processing_time_ms: {total}");
    if !responses.is_empty() {
        let avg = total as f64 / responses.len() as f64;
        let _ = writeln!(footer, "avg_processing_time_ms: {avg:.1}");
    }
    let mut models: Vec<&&str> = by_model.keys().collect();
    models.sort();
    for model in models {
        let times = &by_model[*model];
        let sum: u64 = times.iter().sum();
        let avg = sum as f64 / times.len() as f64;
        let _ = writeln!(footer, "  {model}: count={} avg_ms={avg:.1}", times.len());
    }
    footer.push_str("PROCESSING_DETAILS_END");
    footer
}

/// The final, user-facing result of a completed request.
#[derive(Debug, Clone)]
pub struct FinalResponse {
    /// The synthesized (or best-effort fallback) text, including the
    /// processing-details footer.
    pub text: String,
    /// Whether the summarization pass itself succeeded, or this is a
    /// raw-best-response fallback.
    pub summarized: bool,
}

/// Synthesizes one final reply from a dispatch round.
pub struct Summarizer {
    backend: std::sync::Arc<dyn SummaryBackend>,
}

impl Summarizer {
    /// Build a summarizer around the given backend.
    pub fn new(backend: std::sync::Arc<dyn SummaryBackend>) -> Self {
        Self { backend }
    }

    /// Summarize `responses` against `original_prompt`, falling back to the
    /// "best client" (the highest performance-score worker) raw text if the
    /// summarization pass itself fails or returns empty output. Summarizer
    /// failures are always absorbed — this function never returns an error.
    pub async fn summarize(&self, original_prompt: &str, responses: &[WorkerResponse]) -> FinalResponse {
        if responses.is_empty() {
            return FinalResponse { text: String::new(), summarized: false };
        }

        let mut by_score = responses.to_vec();
        by_score.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let installed: Vec<&str> = responses.iter().map(|r| r.model.as_str()).collect();
        let model = best_local_model(&installed);
        let prompt = build_summary_prompt(original_prompt, responses);

        match self.backend.generate(&model, &prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                FinalResponse { text: format!("{text}{}", format_processing_details(responses)), summarized: true }
            }
            _ => {
                let best = by_score.first().expect("responses is non-empty");
                FinalResponse {
                    text: format!("{}{}", best.text, format_processing_details(responses)),
                    summarized: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubBackend {
        result: Result<String, ()>,
    }

    #[async_trait]
    impl SummaryBackend for StubBackend {
        async fn generate(&self, _model: &str, _prompt: &str) -> anyhow::Result<String> {
            self.result.clone().map_err(|_| anyhow::anyhow!("summarizer backend unavailable"))
        }
    }

    fn response(worker_id: &str, model: &str, ms: u64) -> WorkerResponse {
        response_with_score(worker_id, model, ms, 0.0)
    }

    fn response_with_score(worker_id: &str, model: &str, ms: u64, score: f64) -> WorkerResponse {
        WorkerResponse {
            worker_id: worker_id.to_string(),
            model: model.to_string(),
            text: format!("{worker_id} says hi"),
            processing_time_ms: ms,
            score,
        }
    }

    #[test]
    fn prefers_gemma3_1b_when_available() {
        assert_eq!(best_local_model(&["llama3.1:8b", "gemma3:1b"]), PREFERRED_SUMMARY_MODEL);
    }

    #[test]
    fn falls_back_to_most_complex_installed_model() {
        assert_eq!(best_local_model(&["llama3.2:1b", "llama3.1:70b"]), "llama3.1:70b");
    }

    #[test]
    fn falls_back_to_hardcoded_last_resort() {
        assert_eq!(best_local_model(&[]), LAST_RESORT_MODEL);
    }

    #[tokio::test]
    async fn successful_summary_includes_processing_footer() {
        let summarizer = Summarizer::new(std::sync::Arc::new(StubBackend { result: Ok("synthesized answer".to_string()) }));
        let responses = vec![response("w1", "llama3.1:8b", 120)];
        let result = summarizer.summarize("what is rust?", &responses).await;
        assert!(result.summarized);
        assert!(result.text.contains("synthesized answer"));
        assert!(result.text.contains("PROCESSING_DETAILS_START"));
        assert!(result.text.contains("PROCESSING_DETAILS_END"));
    }

    #[tokio::test]
    async fn failed_summary_falls_back_to_best_scoring_response() {
        let summarizer = Summarizer::new(std::sync::Arc::new(StubBackend { result: Err(()) }));
        // "slow" is the faster responder by processing time but "fast" has the
        // higher performance score — the fallback must pick by score, not speed.
        let responses =
            vec![response_with_score("slow", "llama3.1:8b", 50, 90.0), response_with_score("fast", "llama3.2:1b", 500, 20.0)];
        let result = summarizer.summarize("hello", &responses).await;
        assert!(!result.summarized);
        assert!(result.text.starts_with("slow says hi"));
    }

    #[tokio::test]
    async fn empty_summary_output_falls_back_to_best_scoring_response() {
        let summarizer = Summarizer::new(std::sync::Arc::new(StubBackend { result: Ok("   ".to_string()) }));
        let responses =
            vec![response_with_score("weak", "llama3.1:8b", 50, 20.0), response_with_score("strong", "llama3.2:1b", 500, 90.0)];
        let result = summarizer.summarize("hello", &responses).await;
        assert!(!result.summarized);
        assert!(result.text.starts_with("strong says hi"));
    }

    #[tokio::test]
    async fn empty_responses_yields_empty_unsummarized_result() {
        let summarizer = Summarizer::new(std::sync::Arc::new(StubBackend { result: Ok(String::new()) }));
        let result = summarizer.summarize("hello", &[]).await;
        assert!(!result.summarized);
        assert!(result.text.is_empty());
    }
}
