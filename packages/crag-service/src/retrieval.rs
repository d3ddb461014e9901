use std::collections::HashSet;

use futures::future;
use tokio_util::sync::CancellationToken;

use crate::{
	Error, IntentTagSet, RagService, Result, RetrievalOutcome, RetrievedFragment, SearchIndex,
	SearchQuery,
};

impl RagService {
	/// Document fragments for `query`, filtered by any of the tags, with their neighbours.
	///
	/// Falls back to the store's direct recall when the search finds nothing or fails.
	pub async fn retrieve(
		&self,
		query: &str,
		tags: &IntentTagSet,
		cancel: &CancellationToken,
	) -> Result<RetrievalOutcome> {
		let search = SearchQuery {
			index: SearchIndex::Documents,
			text: query.to_string(),
			filters: tags.filters(),
			min_relevance: self.cfg.retrieval.min_relevance,
			limit: self.cfg.retrieval.limit,
		};
		let hits = match crate::with_cancel(cancel, self.store.search(&search)).await {
			Ok(hits) => hits,
			Err(Error::Cancelled) => return Err(Error::Cancelled),
			Err(err) => {
				tracing::warn!(error = %err, "Document search failed. Falling back to direct recall.");

				Vec::new()
			},
		};

		tracing::debug!(
			hits = hits.len(),
			filters = search.filters.len(),
			"Document search finished."
		);

		if hits.is_empty() {
			return self.recall(query, cancel).await;
		}

		let anchors: Vec<RetrievedFragment> = hits.into_iter().map(|hit| hit.into_fragment()).collect();
		let fragments = if self.cfg.retrieval.expand_adjacent {
			self.expand_adjacent(anchors, cancel).await?
		} else {
			dedup_fragments(anchors)
		};

		Ok(RetrievalOutcome { fragments, direct_answer: None })
	}

	async fn recall(&self, query: &str, cancel: &CancellationToken) -> Result<RetrievalOutcome> {
		let min_relevance = self.cfg.retrieval.ask_min_relevance;

		match crate::with_cancel(cancel, self.store.ask_direct(query, min_relevance)).await {
			Ok(answer) if answer.found => {
				tracing::debug!(sources = answer.sources.len(), "Direct recall found an answer.");

				Ok(RetrievalOutcome { fragments: answer.sources, direct_answer: Some(answer.text) })
			},
			Ok(_) => {
				tracing::info!("Direct recall found no answer.");

				Ok(RetrievalOutcome::default())
			},
			Err(Error::Cancelled) => Err(Error::Cancelled),
			Err(err) => {
				tracing::warn!(error = %err, "Direct recall failed. Continuing without context.");

				Ok(RetrievalOutcome::default())
			},
		}
	}

	/// Adds partitions `n - 1` and `n + 1` of each anchor's document right after the anchor.
	async fn expand_adjacent(
		&self,
		anchors: Vec<RetrievedFragment>,
		cancel: &CancellationToken,
	) -> Result<Vec<RetrievedFragment>> {
		let lookups = anchors.iter().map(|anchor| async move {
			let previous = match anchor.partition_number.checked_sub(1) {
				Some(number) if number >= 0 => {
					self.neighbour(&anchor.document_id, number, cancel).await?
				},
				_ => None,
			};
			let next = match anchor.partition_number.checked_add(1) {
				Some(number) => self.neighbour(&anchor.document_id, number, cancel).await?,
				None => None,
			};

			Ok::<_, Error>([previous, next])
		});
		let neighbours = future::try_join_all(lookups).await?;
		let mut seen: HashSet<(String, i64)> = anchors
			.iter()
			.map(|anchor| (anchor.document_id.clone(), anchor.partition_number))
			.collect();
		let mut fragments = Vec::with_capacity(anchors.len() * 3);

		for (anchor, pair) in anchors.into_iter().zip(neighbours) {
			let relevance = anchor.relevance_score;

			if fragments.iter().any(|known: &RetrievedFragment| known.key() == anchor.key()) {
				continue;
			}

			fragments.push(anchor);

			for mut neighbour in pair.into_iter().flatten() {
				if seen.insert((neighbour.document_id.clone(), neighbour.partition_number)) {
					neighbour.relevance_score = relevance;
					fragments.push(neighbour);
				}
			}
		}

		Ok(fragments)
	}

	/// A missing or failing lookup is no neighbour; only cancellation is returned.
	async fn neighbour(
		&self,
		document_id: &str,
		partition_number: i64,
		cancel: &CancellationToken,
	) -> Result<Option<RetrievedFragment>> {
		match crate::with_cancel(cancel, self.store.partition(document_id, partition_number)).await
		{
			Ok(fragment) => Ok(fragment.filter(|fragment| fragment.document_id == document_id)),
			Err(Error::Cancelled) => Err(Error::Cancelled),
			Err(err) => {
				tracing::warn!(
					error = %err,
					document_id,
					partition_number,
					"Adjacent partition lookup failed."
				);

				Ok(None)
			},
		}
	}
}

fn dedup_fragments(fragments: Vec<RetrievedFragment>) -> Vec<RetrievedFragment> {
	let mut seen = HashSet::new();

	fragments
		.into_iter()
		.filter(|fragment| seen.insert((fragment.document_id.clone(), fragment.partition_number)))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fragment(document_id: &str, partition_number: i64) -> RetrievedFragment {
		RetrievedFragment {
			document_id: document_id.to_string(),
			source_name: format!("{document_id}.pdf"),
			partition_number,
			text: format!("{document_id} part {partition_number}"),
			relevance_score: 0.5,
		}
	}

	#[test]
	fn duplicates_keep_the_first_occurrence() {
		let fragments =
			dedup_fragments(vec![fragment("a", 1), fragment("b", 1), fragment("a", 1), fragment("a", 2)]);
		let keys: Vec<(&str, i64)> = fragments.iter().map(RetrievedFragment::key).collect();

		assert_eq!(keys, vec![("a", 1), ("b", 1), ("a", 2)]);
	}
}
