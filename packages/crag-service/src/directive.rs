use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{Error, Maintenance, RagService, Result};
use crag_domain::conversation::Conversation;

pub const HELP: &str = "\
Commands:
  /exit, /q                 Leave the chat.
  /clear                    Start a new conversation.
  /removeindex, /ri         Delete the document and intent indexes, then start over.
  /reimport, /im            Run the configured reimport command, then start over.
  /generateintents, /gi     Rebuild the intent index from the taxonomy.
  /status <document-id>     Show whether a document has been indexed.
  /help, /h                 Show this list.";

pub const UNKNOWN: &str = "Unknown command. Type /help for a list of commands.";

/// Out-of-band console command. Directives never enter the turn state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
	Exit,
	Clear,
	RemoveIndex,
	Reimport,
	GenerateIntents,
	Status { document_id: Option<String> },
	Help,
	Unknown { command: String },
}

/// Parses `input` as a directive; plain chat input yields `None`.
pub fn parse_directive(input: &str) -> Option<Directive> {
	let input = input.trim();

	if !input.starts_with('/') {
		return None;
	}

	let mut parts = input.split_whitespace();
	let command = parts.next().unwrap_or_default();
	let directive = match command.to_lowercase().as_str() {
		"/exit" | "/q" => Directive::Exit,
		"/clear" => Directive::Clear,
		"/removeindex" | "/ri" => Directive::RemoveIndex,
		"/reimport" | "/im" => Directive::Reimport,
		"/generateintents" | "/gi" => Directive::GenerateIntents,
		"/status" => Directive::Status { document_id: parts.next().map(str::to_string) },
		"/help" | "/h" => Directive::Help,
		_ => Directive::Unknown { command: command.to_string() },
	};

	Some(directive)
}

impl RagService {
	/// Runs a directive and returns the report shown to the user. [`Directive::Exit`] is handled
	/// by the caller.
	pub async fn run_directive(
		&self,
		directive: &Directive,
		conversation: &mut Conversation,
		cancel: &CancellationToken,
	) -> Result<String> {
		match directive {
			Directive::Exit => Ok("Goodbye.".to_string()),
			Directive::Clear => {
				conversation.reset();

				Ok("Conversation cleared.".to_string())
			},
			Directive::RemoveIndex => {
				let report =
					crate::with_cancel(cancel, self.maintenance()?.clear_indexes()).await?;

				conversation.reset();

				Ok(report)
			},
			Directive::Reimport => {
				let report = crate::with_cancel(cancel, self.maintenance()?.reimport()).await?;

				conversation.reset();

				Ok(report)
			},
			Directive::GenerateIntents => {
				let Some(taxonomy) = self.taxonomy.as_deref().filter(|taxonomy| !taxonomy.is_empty())
				else {
					return Err(Error::InvalidRequest {
						message: "No intent taxonomy is configured.".to_string(),
					});
				};
				let count =
					crate::with_cancel(cancel, self.maintenance()?.rebuild_intents(taxonomy)).await?;

				Ok(format!("Intent index rebuilt with {count} example questions."))
			},
			Directive::Status { document_id: None } => {
				Ok("Usage: /status <document-id>".to_string())
			},
			Directive::Status { document_id: Some(document_id) } => {
				let ready =
					crate::with_cancel(cancel, self.store.is_document_ready(document_id)).await?;

				if ready {
					Ok(format!("Document {document_id} is ready."))
				} else {
					Ok(format!("Document {document_id} is not indexed yet."))
				}
			},
			Directive::Help => Ok(HELP.to_string()),
			Directive::Unknown { command } => {
				tracing::debug!(command = %command, "Unknown directive.");

				Ok(UNKNOWN.to_string())
			},
		}
	}

	fn maintenance(&self) -> Result<Arc<dyn Maintenance>> {
		self.maintenance.clone().ok_or_else(|| Error::Maintenance {
			message: "Index maintenance is not available.".to_string(),
		})
	}
}
