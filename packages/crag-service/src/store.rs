use std::{collections::BTreeMap, sync::Arc};

use tokio::process::Command;

use crate::{
	BoxFuture, DirectAnswer, Error, KnowledgeStore, Maintenance, Providers, Result,
	RetrievedFragment, SearchIndex, SearchQuery, StoreHit,
	model::{INTENT_TAG, MAIN_INTENT_TAG},
	prompts,
};
use crag_config::{Config, Taxonomy};
use crag_domain::conversation::ChatMessage;
use crag_storage::{
	models::{IntentExample, PartitionRecord, TagCondition},
	qdrant::QdrantStore,
};

const INTENT_BATCH_SIZE: usize = 32;

/// Knowledge store backed by Qdrant. Queries are embedded with the configured provider.
pub struct QdrantKnowledgeStore {
	cfg: Arc<Config>,
	qdrant: Arc<QdrantStore>,
	providers: Providers,
}
impl QdrantKnowledgeStore {
	pub fn new(cfg: Arc<Config>, qdrant: Arc<QdrantStore>, providers: Providers) -> Self {
		Self { cfg, qdrant, providers }
	}

	async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
		let texts = [text.to_string()];
		let vectors = self.providers.embedding.embed(&self.cfg.providers.embedding, &texts).await?;

		vectors.into_iter().next().ok_or_else(|| Error::Provider {
			message: "Embedding provider returned no vector.".to_string(),
		})
	}

	async fn search_hits(&self, query: &SearchQuery) -> Result<Vec<StoreHit>> {
		let vector = self.embed_one(&query.text).await?;

		match query.index {
			SearchIndex::Documents => {
				let tags: Vec<TagCondition> = query
					.filters
					.iter()
					.map(|filter| TagCondition::new(filter.key.clone(), filter.value.clone()))
					.collect();
				let records = self
					.qdrant
					.search_partitions(vector, &tags, query.min_relevance, query.limit)
					.await?;

				Ok(records.into_iter().map(hit_from_partition).collect())
			},
			SearchIndex::Intents => {
				let records =
					self.qdrant.search_intents(vector, query.min_relevance, query.limit).await?;

				Ok(records
					.into_iter()
					.map(|record| {
						let mut tags = BTreeMap::new();

						tags.insert(INTENT_TAG.to_string(), record.intents);
						tags.insert(MAIN_INTENT_TAG.to_string(), record.main_intents);

						StoreHit { relevance: record.score, tags, ..StoreHit::default() }
					})
					.collect())
			},
		}
	}

	async fn answer_directly(&self, query: &str, min_relevance: f32) -> Result<DirectAnswer> {
		let marker = self.cfg.retrieval.not_found_marker.as_str();
		let vector = self.embed_one(query).await?;
		let sources: Vec<RetrievedFragment> = self
			.qdrant
			.search_partitions(vector, &[], min_relevance, self.cfg.retrieval.ask_limit)
			.await?
			.into_iter()
			.map(|record| hit_from_partition(record).into_fragment())
			.collect();

		if sources.is_empty() {
			return Ok(not_found(marker));
		}

		let facts = prompts::render_fragments(&sources);
		let messages = [ChatMessage::user(prompts::direct_answer(&facts, query, marker))];
		let reply = self.providers.chat.generate(&self.cfg.providers.chat, &messages).await?;
		let text = reply.trim();

		if text.is_empty() || text.to_lowercase().contains(&marker.to_lowercase()) {
			return Ok(not_found(marker));
		}

		Ok(DirectAnswer { text: text.to_string(), found: true, sources })
	}
}
impl KnowledgeStore for QdrantKnowledgeStore {
	fn search<'a>(&'a self, query: &'a SearchQuery) -> BoxFuture<'a, Result<Vec<StoreHit>>> {
		Box::pin(self.search_hits(query))
	}

	fn partition<'a>(
		&'a self,
		document_id: &'a str,
		partition_number: i64,
	) -> BoxFuture<'a, Result<Option<RetrievedFragment>>> {
		Box::pin(async move {
			let record = self.qdrant.partition(document_id, partition_number).await?;

			Ok(record.map(|record| hit_from_partition(record).into_fragment()))
		})
	}

	fn ask_direct<'a>(
		&'a self,
		query: &'a str,
		min_relevance: f32,
	) -> BoxFuture<'a, Result<DirectAnswer>> {
		Box::pin(self.answer_directly(query, min_relevance))
	}

	fn is_document_ready<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			Ok(self.qdrant.count_document_partitions(document_id).await? > 0)
		})
	}
}

/// Index maintenance against the same Qdrant collections.
pub struct QdrantMaintenance {
	cfg: Arc<Config>,
	qdrant: Arc<QdrantStore>,
	providers: Providers,
}
impl QdrantMaintenance {
	pub fn new(cfg: Arc<Config>, qdrant: Arc<QdrantStore>, providers: Providers) -> Self {
		Self { cfg, qdrant, providers }
	}

	async fn delete_all(&self) -> Result<String> {
		let deleted = self.qdrant.delete_collections().await?;

		tracing::info!(?deleted, "Index collections deleted.");

		if deleted.is_empty() {
			Ok("No index collections to delete.".to_string())
		} else {
			Ok(format!("Deleted index collections: {}.", deleted.join(", ")))
		}
	}

	async fn rebuild(&self, taxonomy: &Taxonomy) -> Result<usize> {
		self.qdrant.ensure_intent_collection().await?;

		let examples: Vec<_> = taxonomy.examples().collect();
		let mut written = 0;

		for batch in examples.chunks(INTENT_BATCH_SIZE) {
			let texts: Vec<String> = batch.iter().map(|example| example.question.to_string()).collect();
			let vectors =
				self.providers.embedding.embed(&self.cfg.providers.embedding, &texts).await?;

			if vectors.len() != batch.len() {
				return Err(Error::Provider {
					message: format!(
						"Expected {} intent embeddings, got {}.",
						batch.len(),
						vectors.len()
					),
				});
			}

			let points: Vec<IntentExample> = batch
				.iter()
				.zip(vectors)
				.map(|(example, vector)| IntentExample {
					category: example.category.to_string(),
					subcategory: example.subcategory.to_string(),
					question: example.question.to_string(),
					vector,
				})
				.collect();

			written += self.qdrant.upsert_intent_examples(&points).await?;
		}

		tracing::info!(written, "Intent index rebuilt.");

		Ok(written)
	}

	async fn run_reimport(&self) -> Result<String> {
		let Some((program, args)) = self
			.cfg
			.maintenance
			.reimport_command
			.as_deref()
			.and_then(|command| command.split_first())
		else {
			return Err(Error::Maintenance {
				message: "No reimport command is configured.".to_string(),
			});
		};

		tracing::info!(program = %program, ?args, "Running reimport command.");

		let output = Command::new(program).args(args).kill_on_drop(true).output().await.map_err(
			|err| Error::Maintenance { message: format!("Failed to start {program}: {err}") },
		)?;

		if !output.status.success() {
			let stderr = String::from_utf8_lossy(&output.stderr);

			return Err(Error::Maintenance {
				message: format!("Reimport exited with {}: {}", output.status, stderr.trim()),
			});
		}

		let stdout = String::from_utf8_lossy(&output.stdout);
		let stdout = stdout.trim();

		if stdout.is_empty() {
			Ok("Reimport finished.".to_string())
		} else {
			Ok(format!("Reimport finished.\n{stdout}"))
		}
	}
}
impl Maintenance for QdrantMaintenance {
	fn clear_indexes(&self) -> BoxFuture<'_, Result<String>> {
		Box::pin(self.delete_all())
	}

	fn rebuild_intents<'a>(&'a self, taxonomy: &'a Taxonomy) -> BoxFuture<'a, Result<usize>> {
		Box::pin(self.rebuild(taxonomy))
	}

	fn reimport(&self) -> BoxFuture<'_, Result<String>> {
		Box::pin(self.run_reimport())
	}
}

fn hit_from_partition(record: PartitionRecord) -> StoreHit {
	StoreHit {
		document_id: record.document_id,
		source_name: record.source_name,
		partition_number: record.partition_number,
		text: record.text,
		relevance: record.score,
		tags: BTreeMap::new(),
	}
}

fn not_found(marker: &str) -> DirectAnswer {
	DirectAnswer { text: marker.to_string(), found: false, sources: Vec::new() }
}
