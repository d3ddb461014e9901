use tokio_util::sync::CancellationToken;

use crate::{Error, RagService, Result, RoutingDecision, prompts};
use crag_domain::{
	conversation::{ChatMessage, Conversation},
	model_output::{self, VerdictSource},
	routing,
};

impl RagService {
	/// Decides whether `question` needs document retrieval.
	///
	/// The router model is asked first. A negative or unusable verdict is overridden when the raw
	/// input carries a forced-retrieval term. Model failures count as a negative verdict.
	pub async fn route(
		&self,
		conversation: &Conversation,
		question: &str,
		raw_input: &str,
		cancel: &CancellationToken,
	) -> Result<RoutingDecision> {
		let transcript = conversation.rewrite_transcript(
			question,
			self.cfg.rewrite.max_user_turns as usize,
			self.cfg.rewrite.recent_messages as usize,
		);
		let messages = [ChatMessage::system(prompts::ROUTER), ChatMessage::user(transcript)];
		let reply = crate::with_cancel(
			cancel,
			self.providers.chat.generate(&self.cfg.providers.router, &messages),
		)
		.await;
		let raw = match reply {
			Ok(raw) => raw,
			Err(Error::Cancelled) => return Err(Error::Cancelled),
			Err(err) => {
				tracing::warn!(error = %err, "Router call failed. Assuming no retrieval.");

				String::new()
			},
		};
		let model_verdict = if raw.is_empty() { false } else { routing_verdict(&raw) };

		Ok(decide(model_verdict, raw, raw_input, &self.cfg.routing.forced_terms))
	}
}

pub(crate) fn routing_verdict(raw: &str) -> bool {
	match model_output::parse_routing_verdict(raw) {
		Ok(verdict) => {
			if verdict.source == VerdictSource::Array {
				tracing::warn!(
					preview = %model_output::preview(raw),
					"Router replied with an array. Using the first element."
				);
			}

			verdict.requires_retrieval
		},
		Err(err) => {
			tracing::warn!(error = %err, "Router output could not be parsed. Assuming no retrieval.");

			false
		},
	}
}

/// Applies the forced-retrieval override. It only ever turns `false` into `true`.
pub(crate) fn decide(
	model_verdict: bool,
	raw: String,
	raw_input: &str,
	forced_terms: &[String],
) -> RoutingDecision {
	let forced_term = if model_verdict {
		None
	} else {
		routing::forced_retrieval_term(raw_input, forced_terms).map(str::to_string)
	};

	if let Some(term) = &forced_term {
		tracing::info!(term = %term, "Retrieval forced by document vocabulary.");
	}

	RoutingDecision {
		needs_retrieval: model_verdict || forced_term.is_some(),
		model_verdict,
		forced_term,
		raw,
	}
}
