use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub chat: Chat,
	#[serde(default)]
	pub rewrite: Rewrite,
	#[serde(default)]
	pub routing: Routing,
	#[serde(default)]
	pub intents: Intents,
	#[serde(default)]
	pub keywords: Keywords,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub rerank: Rerank,
	#[serde(default)]
	pub grounding: Grounding,
	#[serde(default)]
	pub maintenance: Maintenance,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub qdrant: Qdrant,
}

#[derive(Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	/// Collection holding document partitions.
	pub collection: String,
	/// Collection holding labelled example questions for intent classification.
	pub intent_collection: String,
	pub vector_dim: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	/// Model used for rewriting, answering, direct recall, and fact checking.
	pub chat: LlmProviderConfig,
	/// Lighter model consulted for the retrieve-or-not decision.
	pub router: LlmProviderConfig,
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	#[serde(default)]
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	#[serde(default)]
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Chat {
	pub system_prompt: String,
	pub greeting: Option<String>,
	/// Print answer tokens as they arrive instead of waiting for the full reply.
	pub stream: bool,
}
impl Default for Chat {
	fn default() -> Self {
		Self {
			system_prompt: default_system_prompt(),
			greeting: Some(
				"Ask a question about your documents, or type /help for commands.".to_string(),
			),
			stream: true,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Rewrite {
	/// Above this many user turns the transcript is shortened.
	pub max_user_turns: u32,
	/// Trailing messages kept next to the system prompt once the transcript is shortened.
	pub recent_messages: u32,
}
impl Default for Rewrite {
	fn default() -> Self {
		Self { max_user_turns: 9, recent_messages: 5 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Routing {
	/// Lowercase prefixes that force retrieval when any input token starts with one of them.
	pub forced_terms: Vec<String>,
}
impl Default for Routing {
	fn default() -> Self {
		Self { forced_terms: default_forced_terms() }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Intents {
	pub taxonomy_path: Option<String>,
	pub min_relevance: f32,
	pub limit: u32,
	/// Number of top standalone questions classified per turn.
	pub max_questions: u32,
}
impl Default for Intents {
	fn default() -> Self {
		Self { taxonomy_path: None, min_relevance: 0.0, limit: 10, max_questions: 1 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Keywords {
	pub enabled: bool,
	pub max_keywords: u32,
	pub max_entities: u32,
}
impl Default for Keywords {
	fn default() -> Self {
		Self { enabled: true, max_keywords: 10, max_entities: 5 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub min_relevance: f32,
	pub limit: u32,
	pub expand_adjacent: bool,
	pub ask_min_relevance: f32,
	pub ask_limit: u32,
	pub not_found_marker: String,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			min_relevance: 0.4,
			limit: 3,
			expand_adjacent: true,
			ask_min_relevance: 0.7,
			ask_limit: 5,
			not_found_marker: "INFO NOT FOUND".to_string(),
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Rerank {
	pub enabled: bool,
	pub similarity_weight: f32,
	pub retrieval_weight: f32,
	/// Keep only this many fragments after reranking when set and positive.
	pub top_k: Option<u32>,
}
impl Default for Rerank {
	fn default() -> Self {
		Self { enabled: true, similarity_weight: 0.7, retrieval_weight: 0.3, top_k: None }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Grounding {
	/// One of lexical, fact_check, or both.
	pub policy: String,
	pub min_overlap: u32,
	pub warning_banner: String,
}
impl Default for Grounding {
	fn default() -> Self {
		Self {
			policy: "lexical".to_string(),
			min_overlap: 3,
			warning_banner: "[Warning: This answer is not based on the retrieved documents.]"
				.to_string(),
		}
	}
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Maintenance {
	/// Program and arguments run by the reimport directive.
	pub reimport_command: Option<Vec<String>>,
}

/// Category to subcategory to example questions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Taxonomy {
	pub categories: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}
impl Taxonomy {
	pub fn is_empty(&self) -> bool {
		self.categories.is_empty()
	}

	/// True when `tag` names a category or a subcategory, compared case-insensitively.
	pub fn contains_tag(&self, tag: &str) -> bool {
		self.categories.iter().any(|(category, subcategories)| {
			category.eq_ignore_ascii_case(tag)
				|| subcategories.keys().any(|subcategory| subcategory.eq_ignore_ascii_case(tag))
		})
	}

	pub fn examples(&self) -> impl Iterator<Item = TaxonomyExample<'_>> {
		self.categories.iter().flat_map(|(category, subcategories)| {
			subcategories.iter().flat_map(move |(subcategory, questions)| {
				questions.iter().map(move |question| TaxonomyExample {
					category: category.as_str(),
					subcategory: subcategory.as_str(),
					question: question.as_str(),
				})
			})
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxonomyExample<'a> {
	pub category: &'a str,
	pub subcategory: &'a str,
	pub question: &'a str,
}

fn default_system_prompt() -> String {
	"You are a helpful assistant that answers questions with the help of retrieved document \
	 context. Keep answers brief. If the context does not contain the answer, say that you do \
	 not know. Cite the sources you used as [DocumentName:PartitionNumber]."
		.to_string()
}

fn default_forced_terms() -> Vec<String> {
	[
		"document",
		"file",
		"pdf",
		"policy",
		"policies",
		"contract",
		"invoice",
		"report",
		"manual",
		"attachment",
		"upload",
		"summar",
		"dokument",
		"datei",
		"vertrag",
		"rechnung",
		"richtlinie",
		"bericht",
		"handbuch",
		"anhang",
		"hochgeladen",
		"zusammenfass",
	]
	.into_iter()
	.map(str::to_string)
	.collect()
}
