use std::collections::HashSet;

const DELIMITERS: &[char] = &['.', ',', ';', ':', '!', '?'];

/// Lowercased answer tokens split on whitespace and sentence punctuation.
pub fn overlap_tokens(text: &str) -> HashSet<String> {
	text.split(|ch: char| ch.is_whitespace() || DELIMITERS.contains(&ch))
		.filter(|token| !token.is_empty())
		.map(str::to_lowercase)
		.collect()
}

/// Number of distinct answer tokens that also occur in `chunk`.
pub fn overlap_count(answer: &HashSet<String>, chunk: &str) -> usize {
	overlap_tokens(chunk).intersection(answer).count()
}

/// Grounded when any chunk shares at least `min_overlap` distinct tokens with the answer.
///
/// An empty answer or an empty chunk list is never grounded.
pub fn is_lexically_grounded<'a>(
	answer: &str,
	chunks: impl IntoIterator<Item = &'a str>,
	min_overlap: usize,
) -> bool {
	let answer_tokens = overlap_tokens(answer);

	if answer_tokens.is_empty() {
		return false;
	}

	chunks.into_iter().any(|chunk| overlap_count(&answer_tokens, chunk) >= min_overlap)
}
