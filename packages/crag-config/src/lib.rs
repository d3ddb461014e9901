mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Chat, Config, EmbeddingProviderConfig, Grounding, Intents, Keywords, LlmProviderConfig,
	Maintenance, Providers, Qdrant, Rerank, Retrieval, Rewrite, Routing, Service, Storage,
	Taxonomy, TaxonomyExample,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn load_taxonomy(path: &Path) -> Result<Taxonomy> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadTaxonomy { path: path.to_path_buf(), source: err })?;
	let taxonomy: Taxonomy = serde_json::from_str(&raw)
		.map_err(|err| Error::ParseTaxonomy { path: path.to_path_buf(), source: err })?;

	Ok(taxonomy)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.storage.qdrant.url.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.url must be non-empty.".to_string(),
		});
	}

	for (label, value) in [
		("storage.qdrant.collection", &cfg.storage.qdrant.collection),
		("storage.qdrant.intent_collection", &cfg.storage.qdrant.intent_collection),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if cfg.storage.qdrant.collection == cfg.storage.qdrant.intent_collection {
		return Err(Error::Validation {
			message: "storage.qdrant.intent_collection must differ from storage.qdrant.collection."
				.to_string(),
		});
	}
	if cfg.storage.qdrant.vector_dim == 0 {
		return Err(Error::Validation {
			message: "storage.qdrant.vector_dim must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.qdrant.vector_dim."
				.to_string(),
		});
	}

	for (label, api_base, timeout_ms) in [
		("chat", &cfg.providers.chat.api_base, cfg.providers.chat.timeout_ms),
		("router", &cfg.providers.router.api_base, cfg.providers.router.timeout_ms),
		("embedding", &cfg.providers.embedding.api_base, cfg.providers.embedding.timeout_ms),
	] {
		if api_base.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_base must be non-empty."),
			});
		}
		if timeout_ms == 0 {
			return Err(Error::Validation {
				message: format!("Provider {label} timeout_ms must be greater than zero."),
			});
		}
	}

	if cfg.chat.system_prompt.trim().is_empty() {
		return Err(Error::Validation {
			message: "chat.system_prompt must be non-empty.".to_string(),
		});
	}
	if cfg.rewrite.recent_messages == 0 {
		return Err(Error::Validation {
			message: "rewrite.recent_messages must be greater than zero.".to_string(),
		});
	}
	if cfg.intents.limit == 0 {
		return Err(Error::Validation {
			message: "intents.limit must be greater than zero.".to_string(),
		});
	}
	if cfg.intents.max_questions == 0 {
		return Err(Error::Validation {
			message: "intents.max_questions must be greater than zero.".to_string(),
		});
	}
	if cfg.keywords.max_keywords == 0 {
		return Err(Error::Validation {
			message: "keywords.max_keywords must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.limit == 0 {
		return Err(Error::Validation {
			message: "retrieval.limit must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.ask_limit == 0 {
		return Err(Error::Validation {
			message: "retrieval.ask_limit must be greater than zero.".to_string(),
		});
	}

	for (label, value) in [
		("intents.min_relevance", cfg.intents.min_relevance),
		("retrieval.min_relevance", cfg.retrieval.min_relevance),
		("retrieval.ask_min_relevance", cfg.retrieval.ask_min_relevance),
	] {
		if !value.is_finite() || !(0.0..=1.0).contains(&value) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range 0.0-1.0."),
			});
		}
	}
	for (label, value) in [
		("rerank.similarity_weight", cfg.rerank.similarity_weight),
		("rerank.retrieval_weight", cfg.rerank.retrieval_weight),
	] {
		if !value.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if value < 0.0 {
			return Err(Error::Validation { message: format!("{label} must be zero or greater.") });
		}
	}

	if cfg.rerank.similarity_weight + cfg.rerank.retrieval_weight <= 0.0 {
		return Err(Error::Validation {
			message: "rerank weights must not both be zero.".to_string(),
		});
	}
	if !matches!(cfg.grounding.policy.as_str(), "lexical" | "fact_check" | "both") {
		return Err(Error::Validation {
			message: "grounding.policy must be one of lexical, fact_check, or both.".to_string(),
		});
	}
	if cfg.grounding.min_overlap == 0 {
		return Err(Error::Validation {
			message: "grounding.min_overlap must be greater than zero.".to_string(),
		});
	}

	if let Some(command) = cfg.maintenance.reimport_command.as_ref()
		&& command.first().is_some_and(|program| program.trim().is_empty())
	{
		return Err(Error::Validation {
			message: "maintenance.reimport_command must start with a program name.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.intents.taxonomy_path.as_deref().map(|path| path.trim().is_empty()).unwrap_or(false) {
		cfg.intents.taxonomy_path = None;
	}
	if cfg.chat.greeting.as_deref().map(|greeting| greeting.trim().is_empty()).unwrap_or(false) {
		cfg.chat.greeting = None;
	}
	if cfg.maintenance.reimport_command.as_ref().map(Vec::is_empty).unwrap_or(false) {
		cfg.maintenance.reimport_command = None;
	}

	let mut terms: Vec<String> = Vec::with_capacity(cfg.routing.forced_terms.len());

	for term in &cfg.routing.forced_terms {
		let term = term.trim().to_lowercase();

		if !term.is_empty() && !terms.contains(&term) {
			terms.push(term);
		}
	}

	cfg.routing.forced_terms = terms;
	cfg.grounding.policy = cfg.grounding.policy.trim().to_lowercase();
}
