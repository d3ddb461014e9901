use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	System,
	User,
	Assistant,
}
impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::System => "system",
			Self::User => "user",
			Self::Assistant => "assistant",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub role: Role,
	pub content: String,
}
impl ChatMessage {
	pub fn system(content: impl Into<String>) -> Self {
		Self { role: Role::System, content: content.into() }
	}

	pub fn user(content: impl Into<String>) -> Self {
		Self { role: Role::User, content: content.into() }
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Self { role: Role::Assistant, content: content.into() }
	}
}

/// Ordered chat history whose first entry is always the system prompt.
///
/// Messages are only ever appended, one completed exchange at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
	messages: Vec<ChatMessage>,
}
impl Conversation {
	pub fn new(system_prompt: impl Into<String>) -> Self {
		Self { messages: vec![ChatMessage::system(system_prompt)] }
	}

	pub fn messages(&self) -> &[ChatMessage] {
		&self.messages
	}

	pub fn system_prompt(&self) -> &str {
		self.messages.first().map(|message| message.content.as_str()).unwrap_or_default()
	}

	pub fn len(&self) -> usize {
		self.messages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.messages.len() <= 1
	}

	pub fn user_turns(&self) -> usize {
		self.messages.iter().filter(|message| message.role == Role::User).count()
	}

	/// Appends a finished exchange in one step so a turn never leaves half of it behind.
	pub fn commit_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
		self.messages.reserve(2);
		self.messages.push(ChatMessage::user(user));
		self.messages.push(ChatMessage::assistant(assistant));
	}

	/// Starts over with only the system prompt.
	pub fn reset(&mut self) {
		*self = Self::new(self.system_prompt().to_string());
	}

	/// Transcript handed to the rewriter.
	///
	/// Long histories keep the system prompt and the `recent_messages` newest entries.
	pub fn rewrite_transcript(
		&self,
		input: &str,
		max_user_turns: usize,
		recent_messages: usize,
	) -> String {
		let mut lines: Vec<String> = Vec::new();

		if self.user_turns() > max_user_turns {
			if let Some(system) = self.messages.first() {
				lines.push(render_line(system));
			}

			let start = self.messages.len().saturating_sub(recent_messages).max(1);

			lines.extend(self.messages[start..].iter().map(render_line));
		} else {
			lines.extend(self.messages.iter().map(render_line));
		}

		lines.push(format!("{}: {input}", Role::User.as_str()));

		lines.join("\n")
	}
}

fn render_line(message: &ChatMessage) -> String {
	format!("{}: {}", message.role.as_str(), message.content)
}
