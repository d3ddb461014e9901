use crate::RetrievedFragment;

pub const REWRITE: &str = "\
You turn the last user message of a chat into standalone search questions.
Resolve pronouns and references using the earlier messages so each question can be understood \
without the chat. Keep the user's language. If the message is already standalone, repeat it.
Reply with JSON only: an array of objects with the fields \"standaloneQuestion\" (string) and \
\"score\" (number between 0 and 1, how well the question captures the user's intent).
Example: [{\"standaloneQuestion\": \"What is the notice period of the rental contract?\", \"score\": 0.9}]";

pub const ROUTER: &str = "\
You decide whether answering the last user message needs the user's private documents.
Answer true when the user refers to documents, files, contracts, invoices, reports, policies, \
personal records, or facts that only their documents can contain. Answer false for greetings, \
small talk, and general knowledge.
Reply with JSON only: {\"requiresRAG\": true} or {\"requiresRAG\": false}.";

pub const NO_RETRIEVAL_NOTE: &str = "For this question, you do NOT need to use document memory. \
Please answer from your general knowledge.";

/// User message carrying the grounding context ahead of the question.
pub fn answer_with_context(context: &str, question: &str) -> String {
	format!("Context:\n{context}\n\nQuestion: {question}")
}

/// Fact-check request; the reply must end with `Score: YES` or `Score: NO`.
pub fn fact_check(context: &str, answer: &str) -> String {
	format!(
		"Facts:\n{context}\n\nAnswer:\n{answer}\n\nIs every statement in the answer supported by \
		 the facts above? Explain in one or two sentences, then finish with a final line that \
		 reads exactly \"Score: YES\" or \"Score: NO\"."
	)
}

/// Recall prompt answering from stored facts alone.
pub fn direct_answer(facts: &str, question: &str, not_found: &str) -> String {
	format!(
		"Facts:\n{facts}\n\nGiven only the facts above, provide a very short answer to the \
		 question. If the facts do not contain the answer, reply with '{not_found}'.\n\n\
		 Question: {question}"
	)
}

/// Fragments rendered as `[source:partition]` blocks.
pub fn render_fragments(fragments: &[RetrievedFragment]) -> String {
	fragments
		.iter()
		.filter(|fragment| !fragment.text.trim().is_empty())
		.map(|fragment| {
			format!(
				"[{}:{}]\n{}",
				fragment.source_name,
				fragment.partition_number,
				fragment.text.trim()
			)
		})
		.collect::<Vec<_>>()
		.join("\n\n")
}
