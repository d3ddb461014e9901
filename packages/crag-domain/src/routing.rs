use crate::keywords;

/// First forced term that prefixes a token of `input`, if any.
///
/// Terms are expected lowercase; tokens come from [`keywords::tokenize`].
pub fn forced_retrieval_term<'a>(input: &str, forced_terms: &'a [String]) -> Option<&'a str> {
	let tokens = keywords::tokenize(input);

	forced_terms
		.iter()
		.find(|term| tokens.iter().any(|token| token.starts_with(term.as_str())))
		.map(String::as_str)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn terms() -> Vec<String> {
		["contract", "vertrag", "summar"].into_iter().map(str::to_string).collect()
	}

	#[test]
	fn matches_prefixes_of_tokens() {
		assert_eq!(forced_retrieval_term("Check my Contracts, please", &terms()), Some("contract"));
		assert_eq!(forced_retrieval_term("Wie lange läuft der Vertrag?", &terms()), Some("vertrag"));
		assert_eq!(forced_retrieval_term("Summarize it", &terms()), Some("summar"));
	}

	#[test]
	fn ignores_terms_inside_words() {
		assert_eq!(forced_retrieval_term("A subcontractor called", &terms()), None);
		assert_eq!(forced_retrieval_term("What is the weather?", &terms()), None);
	}
}
