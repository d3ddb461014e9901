#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Vector dimensions differ: {left} vs {right}.")]
pub struct DimensionMismatch {
	pub left: usize,
	pub right: usize,
}

/// Cosine similarity of two vectors. Zero when either vector has no magnitude.
pub fn cosine(left: &[f32], right: &[f32]) -> Result<f32, DimensionMismatch> {
	if left.len() != right.len() {
		return Err(DimensionMismatch { left: left.len(), right: right.len() });
	}

	let mut dot = 0.0_f32;
	let mut left_norm = 0.0_f32;
	let mut right_norm = 0.0_f32;

	for (a, b) in left.iter().zip(right) {
		dot += a * b;
		left_norm += a * a;
		right_norm += b * b;
	}

	if left_norm == 0.0 || right_norm == 0.0 {
		return Ok(0.0);
	}

	Ok(dot / (left_norm.sqrt() * right_norm.sqrt()))
}

pub fn blend(
	similarity: f32,
	retrieval: f32,
	similarity_weight: f32,
	retrieval_weight: f32,
) -> f32 {
	similarity_weight * similarity + retrieval_weight * retrieval
}

/// Finite relevance or zero.
pub fn finite_or_zero(score: f32) -> f32 {
	if score.is_finite() { score } else { 0.0 }
}

pub fn cmp_f32_desc(a: f32, b: f32) -> std::cmp::Ordering {
	b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
}
