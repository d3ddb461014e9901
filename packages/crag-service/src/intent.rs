use futures::future;
use tokio_util::sync::CancellationToken;

use crate::{
	Error, IntentTagSet, RagService, Result, SearchIndex, SearchQuery, StandaloneQuestion,
	StoreHit,
	model::{INTENT_TAG, MAIN_INTENT_TAG},
};
use crag_config::Taxonomy;
use crag_domain::keywords;

impl RagService {
	/// Intent tags from the intent index plus locally extracted keywords for one question.
	pub async fn classify(
		&self,
		question: &str,
		cancel: &CancellationToken,
	) -> Result<IntentTagSet> {
		let query = SearchQuery {
			index: SearchIndex::Intents,
			text: question.to_string(),
			filters: Vec::new(),
			min_relevance: self.cfg.intents.min_relevance,
			limit: self.cfg.intents.limit,
		};
		let intents = match crate::with_cancel(cancel, self.store.search(&query)).await {
			Ok(hits) => intent_tags(&hits, self.taxonomy.as_deref()),
			Err(Error::Cancelled) => return Err(Error::Cancelled),
			Err(err) => {
				tracing::warn!(error = %err, "Intent search failed. Continuing without intents.");

				Vec::new()
			},
		};
		let keywords = if self.cfg.keywords.enabled {
			keywords::extract_tags(
				question,
				self.cfg.keywords.max_keywords as usize,
				self.cfg.keywords.max_entities as usize,
			)
		} else {
			Vec::new()
		};

		tracing::debug!(?intents, ?keywords, "Question classified.");

		Ok(IntentTagSet { intents, keywords })
	}

	/// Classifies the best `intents.max_questions` questions concurrently and merges the tag sets
	/// in question order.
	pub async fn classify_all(
		&self,
		questions: &[StandaloneQuestion],
		cancel: &CancellationToken,
	) -> Result<IntentTagSet> {
		let take = (self.cfg.intents.max_questions as usize).max(1);
		let branches = questions
			.iter()
			.take(take)
			.map(|question| self.classify(&question.text, cancel));
		let results = future::join_all(branches).await;
		let mut merged = IntentTagSet::default();

		for result in results {
			match result {
				Ok(tags) => merged.merge(tags),
				Err(Error::Cancelled) => return Err(Error::Cancelled),
				Err(err) => {
					tracing::warn!(error = %err, "Question classification failed. Skipping it.");
				},
			}
		}

		Ok(merged)
	}
}

/// Distinct `intent` and `mainintent` values in first-occurrence order.
///
/// Values outside a configured taxonomy are dropped, as are blanks and `none`.
pub(crate) fn intent_tags(hits: &[StoreHit], taxonomy: Option<&Taxonomy>) -> Vec<String> {
	let mut tags: Vec<String> = Vec::new();

	for hit in hits {
		let values = hit.tag_values(INTENT_TAG).iter().chain(hit.tag_values(MAIN_INTENT_TAG));

		for value in values {
			let value = value.trim();

			if value.is_empty() || value.eq_ignore_ascii_case("none") {
				continue;
			}
			if let Some(taxonomy) = taxonomy
				&& !taxonomy.is_empty()
				&& !taxonomy.contains_tag(value)
			{
				tracing::debug!(tag = %value, "Dropping intent outside the taxonomy.");

				continue;
			}
			if !tags.iter().any(|known| known == value) {
				tags.push(value.to_string());
			}
		}
	}

	tags
}
