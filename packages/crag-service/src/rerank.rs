use tokio_util::sync::CancellationToken;

use crate::{Error, RagService, Result, RetrievedFragment};
use crag_domain::similarity;

impl RagService {
	/// Reorders fragments by a blend of query similarity and store relevance.
	///
	/// Returns a new list. Fewer than two fragments, a blank query, or any embedding failure leave
	/// the input order untouched.
	pub async fn rerank(
		&self,
		query: &str,
		fragments: Vec<RetrievedFragment>,
		cancel: &CancellationToken,
	) -> Result<Vec<RetrievedFragment>> {
		let cfg = &self.cfg.rerank;

		if !cfg.enabled || fragments.len() < 2 || query.trim().is_empty() {
			return Ok(fragments);
		}

		let mut texts = Vec::with_capacity(fragments.len() + 1);

		texts.push(query.to_string());
		texts.extend(fragments.iter().map(|fragment| fragment.text.clone()));

		let embedded = crate::with_cancel(
			cancel,
			self.providers.embedding.embed(&self.cfg.providers.embedding, &texts),
		)
		.await;
		let vectors = match embedded {
			Ok(vectors) => vectors,
			Err(Error::Cancelled) => return Err(Error::Cancelled),
			Err(err) => {
				tracing::warn!(error = %err, "Rerank embedding failed. Keeping retrieval order.");

				return Ok(fragments);
			},
		};

		match blend_scores(&vectors, fragments.clone(), cfg.similarity_weight, cfg.retrieval_weight) {
			Ok(mut reranked) => {
				if let Some(top_k) = cfg.top_k.filter(|top_k| *top_k > 0) {
					reranked.truncate(top_k as usize);
				}

				Ok(reranked)
			},
			Err(err) => {
				tracing::warn!(error = %err, "Rerank scoring failed. Keeping retrieval order.");

				Ok(fragments)
			},
		}
	}
}

/// `vectors[0]` is the query; the rest pair up with `fragments`.
pub(crate) fn blend_scores(
	vectors: &[Vec<f32>],
	fragments: Vec<RetrievedFragment>,
	similarity_weight: f32,
	retrieval_weight: f32,
) -> Result<Vec<RetrievedFragment>> {
	let Some((query, rest)) = vectors.split_first() else {
		return Err(Error::Provider { message: "Embedding response is empty.".to_string() });
	};

	if rest.len() != fragments.len() {
		return Err(Error::Provider {
			message: format!(
				"Expected {} fragment embeddings, got {}.",
				fragments.len(),
				rest.len()
			),
		});
	}

	let mut reranked = Vec::with_capacity(fragments.len());

	for (mut fragment, vector) in fragments.into_iter().zip(rest) {
		let cosine = similarity::cosine(query, vector)?;

		fragment.relevance_score = similarity::finite_or_zero(similarity::blend(
			cosine,
			fragment.relevance_score,
			similarity_weight,
			retrieval_weight,
		));
		reranked.push(fragment);
	}

	reranked.sort_by(|a, b| similarity::cmp_f32_desc(a.relevance_score, b.relevance_score));

	Ok(reranked)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fragment(partition_number: i64, relevance_score: f32) -> RetrievedFragment {
		RetrievedFragment {
			document_id: "doc".to_string(),
			source_name: "doc.pdf".to_string(),
			partition_number,
			text: String::new(),
			relevance_score,
		}
	}

	#[test]
	fn similarity_outweighs_retrieval_order() {
		let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]];
		let reranked =
			blend_scores(&vectors, vec![fragment(1, 0.9), fragment(2, 0.5)], 0.7, 0.3)
				.expect("Expected reranked fragments.");

		assert_eq!(reranked[0].partition_number, 2);
		assert!((reranked[0].relevance_score - 0.85).abs() < 1e-6);
		assert!((reranked[1].relevance_score - 0.27).abs() < 1e-6);
	}

	#[test]
	fn dimension_mismatch_is_an_error() {
		let vectors = vec![vec![1.0, 0.0], vec![1.0], vec![1.0, 0.0]];
		let err = blend_scores(&vectors, vec![fragment(1, 0.9), fragment(2, 0.5)], 0.7, 0.3)
			.expect_err("Expected a dimension error.");

		assert!(matches!(err, Error::Similarity(mismatch) if mismatch.left == 2 && mismatch.right == 1));
	}

	#[test]
	fn missing_embeddings_are_a_provider_error() {
		let vectors = vec![vec![1.0, 0.0], vec![1.0, 0.0]];
		let err = blend_scores(&vectors, vec![fragment(1, 0.9), fragment(2, 0.5)], 0.7, 0.3)
			.expect_err("Expected a count error.");

		assert!(matches!(err, Error::Provider { message } if message == "Expected 2 fragment embeddings, got 1."));
		assert!(matches!(blend_scores(&[], Vec::new(), 0.7, 0.3), Err(Error::Provider { .. })));
	}
}
