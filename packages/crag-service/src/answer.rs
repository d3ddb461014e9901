use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::{RagService, Result, RetrievalOutcome, prompts};
use crag_domain::conversation::{ChatMessage, Conversation};

impl RagService {
	/// Generates the assistant reply for `question`.
	///
	/// `retrieval` is `None` when the turn was routed away from the documents. Deltas go to `sink`
	/// when streaming is enabled; the full reply is returned either way.
	pub async fn generate_answer(
		&self,
		conversation: &Conversation,
		question: &str,
		retrieval: Option<&RetrievalOutcome>,
		sink: Option<&UnboundedSender<String>>,
		cancel: &CancellationToken,
	) -> Result<String> {
		let messages = answer_messages(conversation, question, retrieval);
		let cfg = &self.cfg.providers.chat;
		let reply = match sink.filter(|_| self.cfg.chat.stream) {
			Some(sink) => {
				crate::with_cancel(cancel, self.providers.chat.stream(cfg, &messages, sink)).await?
			},
			None => crate::with_cancel(cancel, self.providers.chat.generate(cfg, &messages)).await?,
		};

		tracing::debug!(chars = reply.len(), "Answer generated.");

		Ok(reply)
	}
}

pub(crate) fn answer_messages(
	conversation: &Conversation,
	question: &str,
	retrieval: Option<&RetrievalOutcome>,
) -> Vec<ChatMessage> {
	let mut messages = conversation.messages().to_vec();
	let content = match retrieval {
		None => {
			messages.push(ChatMessage::system(prompts::NO_RETRIEVAL_NOTE));

			question.to_string()
		},
		Some(retrieval) => prompts::answer_with_context(&render_context(retrieval), question),
	};

	messages.push(ChatMessage::user(content));

	messages
}

fn render_context(retrieval: &RetrievalOutcome) -> String {
	let fragments = prompts::render_fragments(&retrieval.fragments);

	match retrieval.direct_answer.as_deref().map(str::trim).filter(|text| !text.is_empty()) {
		Some(answer) if fragments.is_empty() => answer.to_string(),
		Some(answer) => format!("{answer}\n\nSources:\n{fragments}"),
		None => fragments,
	}
}
