use tokio_util::sync::CancellationToken;

use crate::{Error, RagService, Result, StandaloneQuestion, prompts};
use crag_domain::{
	conversation::{ChatMessage, Conversation},
	model_output::{self, ParseError},
	similarity::cmp_f32_desc,
};

impl RagService {
	/// Standalone reformulations of `input`, best first. Never empty.
	///
	/// Any model or parse failure degrades to the raw input; only cancellation is returned.
	pub async fn rewrite(
		&self,
		conversation: &Conversation,
		input: &str,
		cancel: &CancellationToken,
	) -> Result<Vec<StandaloneQuestion>> {
		let transcript = conversation.rewrite_transcript(
			input,
			self.cfg.rewrite.max_user_turns as usize,
			self.cfg.rewrite.recent_messages as usize,
		);
		let messages = [ChatMessage::system(prompts::REWRITE), ChatMessage::user(transcript)];
		let reply = crate::with_cancel(
			cancel,
			self.providers.chat.generate(&self.cfg.providers.chat, &messages),
		)
		.await;

		match reply {
			Ok(raw) => Ok(standalone_questions(&raw, input)),
			Err(Error::Cancelled) => Err(Error::Cancelled),
			Err(err) => {
				tracing::warn!(error = %err, "Query rewrite failed. Using the raw input.");

				Ok(vec![StandaloneQuestion::fallback(input)])
			},
		}
	}
}

pub(crate) fn standalone_questions(raw: &str, input: &str) -> Vec<StandaloneQuestion> {
	let entries = match model_output::parse_rewrite_entries(raw) {
		Ok(entries) => entries,
		Err(ParseError::NotJson { preview }) => {
			tracing::warn!(preview = %preview, "Rewrite output is not JSON. Using the raw input.");

			Vec::new()
		},
		Err(err) => {
			tracing::warn!(error = %err, "Rewrite output could not be parsed. Using the raw input.");

			Vec::new()
		},
	};
	let mut questions: Vec<StandaloneQuestion> = entries
		.into_iter()
		.map(|entry| StandaloneQuestion { text: entry.question, confidence_score: entry.score })
		.collect();

	if questions.is_empty() {
		return vec![StandaloneQuestion::fallback(input)];
	}

	questions.sort_by(|a, b| cmp_f32_desc(a.confidence_score, b.confidence_score));

	tracing::debug!(count = questions.len(), top = %questions[0].text, "Query rewritten.");

	questions
}
