use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const INTENT_TAG: &str = "intent";
pub const MAIN_INTENT_TAG: &str = "mainintent";
pub const KEYWORDS_TAG: &str = "keywords";

/// Self-contained reformulation of the user's utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandaloneQuestion {
	pub text: String,
	pub confidence_score: f32,
}
impl StandaloneQuestion {
	pub fn fallback(input: &str) -> Self {
		Self { text: input.trim().to_string(), confidence_score: 1.0 }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
	pub needs_retrieval: bool,
	/// What the router model said, before any override.
	pub model_verdict: bool,
	/// Forced-retrieval term that overrode a negative verdict.
	pub forced_term: Option<String>,
	pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentTagSet {
	pub intents: Vec<String>,
	pub keywords: Vec<String>,
}
impl IntentTagSet {
	pub fn is_empty(&self) -> bool {
		self.intents.is_empty() && self.keywords.is_empty()
	}

	/// Appends values not yet present, keeping first-occurrence order.
	pub fn merge(&mut self, other: IntentTagSet) {
		for intent in other.intents {
			if !self.intents.contains(&intent) {
				self.intents.push(intent);
			}
		}
		for keyword in other.keywords {
			if !self.keywords.iter().any(|known| known.eq_ignore_ascii_case(&keyword)) {
				self.keywords.push(keyword);
			}
		}
	}

	pub fn filters(&self) -> Vec<TagFilter> {
		self.intents
			.iter()
			.map(|intent| TagFilter::new(INTENT_TAG, intent.clone()))
			.chain(self.keywords.iter().map(|keyword| TagFilter::new(KEYWORDS_TAG, keyword.clone())))
			.collect()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFragment {
	pub document_id: String,
	pub source_name: String,
	pub partition_number: i64,
	pub text: String,
	pub relevance_score: f32,
}
impl RetrievedFragment {
	pub fn key(&self) -> (&str, i64) {
		(self.document_id.as_str(), self.partition_number)
	}
}

/// Answer produced directly by the store's recall path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectAnswer {
	pub text: String,
	pub found: bool,
	pub sources: Vec<RetrievedFragment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
	pub fragments: Vec<RetrievedFragment>,
	pub direct_answer: Option<String>,
}
impl RetrievalOutcome {
	/// True when neither fragments nor a direct answer carry any text.
	pub fn has_no_context(&self) -> bool {
		self.direct_answer.as_deref().map(|text| text.trim().is_empty()).unwrap_or(true)
			&& self.fragments.iter().all(|fragment| fragment.text.trim().is_empty())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingVerdict {
	Grounded,
	Ungrounded,
	Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerCandidate {
	/// Text shown to the user, including any warning banner.
	pub text: String,
	pub verdict: GroundingVerdict,
	pub explanation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchIndex {
	Documents,
	Intents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
	pub key: String,
	pub value: String,
}
impl TagFilter {
	pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
		Self { key: key.into(), value: value.into() }
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
	pub index: SearchIndex,
	pub text: String,
	/// OR'ed tag filters; empty means unfiltered.
	pub filters: Vec<TagFilter>,
	pub min_relevance: f32,
	pub limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreHit {
	pub document_id: String,
	pub source_name: String,
	pub partition_number: i64,
	pub text: String,
	pub relevance: f32,
	pub tags: BTreeMap<String, Vec<String>>,
}
impl StoreHit {
	pub fn into_fragment(self) -> RetrievedFragment {
		RetrievedFragment {
			document_id: self.document_id,
			source_name: self.source_name,
			partition_number: self.partition_number,
			text: self.text,
			relevance_score: crag_domain::similarity::finite_or_zero(self.relevance),
		}
	}

	pub fn tag_values(&self, key: &str) -> &[String] {
		self.tags.get(key).map(Vec::as_slice).unwrap_or_default()
	}
}
