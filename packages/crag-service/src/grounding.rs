use std::str::FromStr;

use tokio_util::sync::CancellationToken;

use crate::{
	AnswerCandidate, Error, GroundingVerdict, RagService, Result, RetrievalOutcome, prompts,
};
use crag_domain::{conversation::ChatMessage, grounding, model_output};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundingPolicy {
	Lexical,
	FactCheck,
	Both,
}
impl FromStr for GroundingPolicy {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self> {
		match value.trim().to_lowercase().as_str() {
			"lexical" => Ok(Self::Lexical),
			"fact_check" => Ok(Self::FactCheck),
			"both" => Ok(Self::Both),
			other => Err(Error::InvalidRequest {
				message: format!("Unknown grounding policy {other:?}."),
			}),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundingCheck {
	pub verdict: GroundingVerdict,
	pub explanation: Option<String>,
}

impl RagService {
	/// Grounding verdict for `answer` against the turn's retrieval context.
	///
	/// `retrieval` is `None` when the turn skipped retrieval, which counts as grounded.
	pub async fn check_grounding(
		&self,
		answer: &str,
		retrieval: Option<&RetrievalOutcome>,
		cancel: &CancellationToken,
	) -> Result<GroundingCheck> {
		let Some(retrieval) = retrieval else {
			return Ok(GroundingCheck { verdict: GroundingVerdict::Grounded, explanation: None });
		};

		if retrieval.has_no_context() {
			return Ok(GroundingCheck { verdict: GroundingVerdict::Unknown, explanation: None });
		}

		let chunks = context_chunks(retrieval);
		let lexical = grounding::is_lexically_grounded(
			answer,
			chunks.iter().copied(),
			self.cfg.grounding.min_overlap as usize,
		);
		let policy = self.cfg.grounding.policy.parse().unwrap_or_else(|err: Error| {
			tracing::warn!(error = %err, "Falling back to lexical grounding.");

			GroundingPolicy::Lexical
		});
		let (grounded, explanation) = match policy {
			GroundingPolicy::Lexical => (lexical, None),
			GroundingPolicy::FactCheck => match self.fact_check(answer, &chunks, cancel).await? {
				Some((verdict, explanation)) => (verdict, explanation),
				None => (lexical, None),
			},
			GroundingPolicy::Both => match self.fact_check(answer, &chunks, cancel).await? {
				Some((verdict, explanation)) => (lexical && verdict, explanation),
				None => (lexical, None),
			},
		};
		let verdict =
			if grounded { GroundingVerdict::Grounded } else { GroundingVerdict::Ungrounded };

		tracing::debug!(?verdict, lexical, ?policy, "Grounding checked.");

		Ok(GroundingCheck { verdict, explanation })
	}

	/// `None` when the fact check failed or gave no score marker.
	async fn fact_check(
		&self,
		answer: &str,
		chunks: &[&str],
		cancel: &CancellationToken,
	) -> Result<Option<(bool, Option<String>)>> {
		let messages = [ChatMessage::user(prompts::fact_check(&chunks.join("\n\n"), answer))];
		let reply = crate::with_cancel(
			cancel,
			self.providers.chat.generate(&self.cfg.providers.chat, &messages),
		)
		.await;

		match reply {
			Ok(raw) => match model_output::parse_fact_check(&raw) {
				Some(verdict) => Ok(Some((verdict, model_output::fact_check_explanation(&raw)))),
				None => {
					tracing::warn!(
						preview = %model_output::preview(&raw),
						"Fact check gave no score. Using the lexical verdict."
					);

					Ok(None)
				},
			},
			Err(Error::Cancelled) => Err(Error::Cancelled),
			Err(err) => {
				tracing::warn!(error = %err, "Fact check failed. Using the lexical verdict.");

				Ok(None)
			},
		}
	}
}

/// Answer candidate with the warning banner prefixed when the verdict is ungrounded.
pub fn apply_banner(answer: &str, check: GroundingCheck, banner: &str) -> AnswerCandidate {
	let text = match check.verdict {
		GroundingVerdict::Ungrounded => {
			let mut text = banner.to_string();

			if let Some(explanation) = &check.explanation {
				text.push_str(&format!("\n[Fact check: {explanation}]"));
			}

			text.push('\n');
			text.push_str(answer);

			text
		},
		GroundingVerdict::Grounded | GroundingVerdict::Unknown => answer.to_string(),
	};

	AnswerCandidate { text, verdict: check.verdict, explanation: check.explanation }
}

fn context_chunks(retrieval: &RetrievalOutcome) -> Vec<&str> {
	retrieval
		.direct_answer
		.as_deref()
		.into_iter()
		.chain(retrieval.fragments.iter().map(|fragment| fragment.text.as_str()))
		.filter(|chunk| !chunk.trim().is_empty())
		.collect()
}
