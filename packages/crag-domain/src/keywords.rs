//! Local keyword and entity extraction used to build retrieval tag filters.
//!
//! Four extractors feed the merged tag list: frequent words, technical terms, RAKE phrases, and
//! capitalized entity sequences. All of them are deterministic for a given input.

use std::{
	collections::{HashMap, HashSet},
	sync::LazyLock,
};

use regex::Regex;

const STOPWORDS: &[&str] = &[
	// German.
	"der", "die", "das", "und", "oder", "aber", "in", "auf", "von", "zu", "mit", "für", "ist",
	"sind", "war", "waren", "wird", "werden", "wurde", "wurden", "hat", "haben", "ein", "eine",
	"einer", "einem", "einen", "des", "dem", "den", "als", "auch", "an", "bei", "nach", "um",
	"am", "im", "zum", "zur", "über", "unter", "durch", "vor", "wie", "was", "wer", "wo", "ich",
	"du", "sie", "wir", "ihr", "es", "nicht", "mein", "meine", "dieser", "diese", "dieses",
	// English.
	"the", "a", "an", "and", "or", "but", "on", "at", "to", "for", "of", "with", "is", "are",
	"was", "were", "be", "been", "being", "have", "has", "had", "having", "do", "does", "did",
	"doing", "would", "should", "could", "ought", "will", "shall", "may", "might", "must", "can",
	"this", "that", "these", "those", "i", "you", "he", "she", "it", "we", "they", "them",
	"their", "what", "which", "who", "when", "where", "why", "how", "all", "each", "every",
	"both", "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own",
	"same", "so", "than", "too", "very", "from", "up", "down", "out", "off", "over", "again",
	"further", "then", "once", "here", "there", "about", "above", "after", "before", "below",
	"between", "during", "through", "into", "by", "as", "if", "because", "while", "until", "my",
	"your", "our", "please", "tell", "me",
];

const TECHNICAL_TERMS: &[&str] = &[
	"api", "sdk", "http", "https", "rest", "graphql", "grpc", "json", "xml", "yaml", "oauth",
	"jwt", "webhook", "endpoint", "middleware", "sql", "nosql", "mongodb", "postgresql", "redis",
	"database", "cache", "blob", "storage", "repository", "index", "schema", "docker",
	"kubernetes", "k8s", "azure", "aws", "gcp", "cloud", "serverless", "container",
	"deployment", "microservice", "architecture", "framework", "library", "plugin",
	"event-driven", "llm", "gpt", "embedding", "vector", "semantic", "transformer", "ollama",
	"model", "inference", "fine-tuning", "prompt", "rag", "retrieval", "knowledge", "chunk",
	"chunking", "similarity", "cosine", "relevance", "rerank", "reranking", "hybrid-search",
	"vector-search", "pdf", "ocr", "tesseract", "markdown", "html", "parser", "extractor",
	"metadata", "nlp", "tokenization", "stemming", "tf-idf", "bm25", "rake", "ner", "ngram",
	"classification", "clustering", "elasticsearch", "lucene", "query", "ranking", "python",
	"typescript", "javascript", "java", "rust", "async", "thread", "concurrent", "logging",
	"telemetry", "encryption", "certificate", "tls", "ssl", "authentication", "authorization",
	"rbac", "unittest", "benchmark", "profiling",
];

static STOPWORD_SET: LazyLock<HashSet<&'static str>> =
	LazyLock::new(|| STOPWORDS.iter().copied().collect());
static NON_WORD: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\W+").ok());
static PHRASE_DELIMITER: LazyLock<Option<Regex>> = LazyLock::new(|| {
	let alternatives =
		STOPWORDS.iter().map(|word| regex::escape(word)).collect::<Vec<_>>().join("|");

	Regex::new(&format!(r"(?i)\b(?:{alternatives})\b|[^\w\s]+")).ok()
});
static ENTITY: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"\b[A-ZÄÖÜ][a-zäöüß]+(?:\s+[A-ZÄÖÜ][a-zäöüß]+)*\b").ok());

/// Lowercased word tokens, split on anything that is not a word character.
pub fn tokenize(text: &str) -> Vec<String> {
	let Some(splitter) = NON_WORD.as_ref() else {
		return Vec::new();
	};

	splitter
		.split(&text.to_lowercase())
		.filter(|token| !token.is_empty())
		.map(str::to_string)
		.collect()
}

pub fn is_stopword(word: &str) -> bool {
	STOPWORD_SET.contains(word.to_lowercase().as_str())
}

/// Single words longer than three characters, most frequent first.
pub fn frequent_words(text: &str, top_n: usize) -> Vec<String> {
	let mut counts: HashMap<String, usize> = HashMap::new();

	for token in tokenize(text) {
		if token.chars().count() > 3 && !STOPWORD_SET.contains(token.as_str()) {
			*counts.entry(token).or_default() += 1;
		}
	}

	let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();

	ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
	ranked.into_iter().take(top_n).map(|(word, _)| word).collect()
}

/// Known technical vocabulary occurring anywhere in the lowercased text, in vocabulary order.
///
/// Matching is by substring, so "APIs" yields `api` and "Dockerfiles" yields `docker`.
pub fn technical_terms(text: &str) -> Vec<String> {
	let lowered = text.to_lowercase();

	TECHNICAL_TERMS
		.iter()
		.filter(|term| lowered.contains(**term))
		.map(|term| (*term).to_string())
		.collect()
}

/// RAKE-style multi-word phrases of two to four words.
pub fn key_phrases(text: &str, top_n: usize) -> Vec<String> {
	let Some(delimiter) = PHRASE_DELIMITER.as_ref() else {
		return Vec::new();
	};

	if text.trim().is_empty() || top_n == 0 {
		return Vec::new();
	}

	let lowered = text.to_lowercase();
	let phrases: Vec<String> = delimiter
		.split(&lowered)
		.map(str::trim)
		.filter(|piece| piece.chars().count() > 3 && !STOPWORD_SET.contains(*piece))
		.filter_map(|piece| {
			let words: Vec<&str> = piece.split_whitespace().collect();

			if (2..=4).contains(&words.len()) && words.iter().all(|word| word.chars().count() > 2)
			{
				Some(words.join(" "))
			} else {
				None
			}
		})
		.collect();
	let mut word_frequency: HashMap<&str, usize> = HashMap::new();

	for phrase in &phrases {
		for word in phrase.split(' ') {
			*word_frequency.entry(word).or_default() += 1;
		}
	}

	let mut phrase_frequency: HashMap<&str, usize> = HashMap::new();

	for phrase in &phrases {
		*phrase_frequency.entry(phrase.as_str()).or_default() += 1;
	}

	let mut scored: Vec<(&str, usize)> = phrase_frequency
		.into_iter()
		.map(|(phrase, frequency)| {
			let words: Vec<&str> = phrase.split(' ').collect();
			let word_score: usize =
				words.iter().map(|word| word_frequency.get(*word).copied().unwrap_or(0)).sum();

			(phrase, word_score * frequency + words.len() * 2)
		})
		.collect();

	scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
	scored.into_iter().take(top_n).map(|(phrase, _)| phrase.to_string()).collect()
}

/// Capitalized word sequences, most frequent first.
pub fn named_entities(text: &str, top_n: usize) -> Vec<String> {
	let Some(pattern) = ENTITY.as_ref() else {
		return Vec::new();
	};
	let mut counts: HashMap<&str, usize> = HashMap::new();

	for found in pattern.find_iter(text) {
		let entity = found.as_str();

		if entity.chars().count() > 2 && !is_stopword(entity) {
			*counts.entry(entity).or_default() += 1;
		}
	}

	let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();

	ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
	ranked.into_iter().take(top_n).map(|(entity, _)| entity.to_string()).collect()
}

/// Frequent words, technical terms, and phrases merged without case-insensitive duplicates.
pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
	let mut merged = Vec::new();
	let mut seen = HashSet::new();

	for candidate in frequent_words(text, max_keywords / 2)
		.into_iter()
		.chain(technical_terms(text))
		.chain(key_phrases(text, max_keywords / 3))
	{
		push_unique(&mut merged, &mut seen, candidate);
	}

	merged.truncate(max_keywords);

	merged
}

/// Keyword tags followed by entity tags, deduplicated case-insensitively.
pub fn extract_tags(text: &str, max_keywords: usize, max_entities: usize) -> Vec<String> {
	let mut merged = Vec::new();
	let mut seen = HashSet::new();

	for candidate in
		extract_keywords(text, max_keywords).into_iter().chain(named_entities(text, max_entities))
	{
		push_unique(&mut merged, &mut seen, candidate);
	}

	merged
}

fn push_unique(out: &mut Vec<String>, seen: &mut HashSet<String>, candidate: String) {
	if seen.insert(candidate.to_lowercase()) {
		out.push(candidate);
	}
}
