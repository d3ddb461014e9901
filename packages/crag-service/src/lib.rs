pub mod answer;
pub mod directive;
pub mod grounding;
pub mod intent;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod rerank;
pub mod retrieval;
pub mod rewrite;
pub mod route;
pub mod store;

mod error;

pub use error::{Error, Result};
pub use model::{
	AnswerCandidate, DirectAnswer, GroundingVerdict, IntentTagSet, RetrievalOutcome,
	RetrievedFragment, RoutingDecision, SearchIndex, SearchQuery, StandaloneQuestion, StoreHit,
	TagFilter,
};
pub use pipeline::{TurnEvent, TurnOutcome, TurnState};

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crag_config::{Config, EmbeddingProviderConfig, LlmProviderConfig, Taxonomy};
use crag_domain::conversation::ChatMessage;
use crag_providers::{chat, embedding};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait ChatProvider
where
	Self: Send + Sync,
{
	fn generate<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, Result<String>>;

	/// Sends content deltas to `sink` as they arrive and resolves to the full reply.
	fn stream<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
		sink: &'a UnboundedSender<String>,
	) -> BoxFuture<'a, Result<String>>;
}

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

/// Document and intent index as seen by the pipeline.
pub trait KnowledgeStore
where
	Self: Send + Sync,
{
	fn search<'a>(&'a self, query: &'a SearchQuery) -> BoxFuture<'a, Result<Vec<StoreHit>>>;

	fn partition<'a>(
		&'a self,
		document_id: &'a str,
		partition_number: i64,
	) -> BoxFuture<'a, Result<Option<RetrievedFragment>>>;

	/// Answers `query` straight from stored facts scoring at least `min_relevance`.
	fn ask_direct<'a>(
		&'a self,
		query: &'a str,
		min_relevance: f32,
	) -> BoxFuture<'a, Result<DirectAnswer>>;

	fn is_document_ready<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<bool>>;
}

pub trait Maintenance
where
	Self: Send + Sync,
{
	fn clear_indexes(&self) -> BoxFuture<'_, Result<String>>;

	fn rebuild_intents<'a>(&'a self, taxonomy: &'a Taxonomy) -> BoxFuture<'a, Result<usize>>;

	fn reimport(&self) -> BoxFuture<'_, Result<String>>;
}

#[derive(Clone)]
pub struct Providers {
	pub chat: Arc<dyn ChatProvider>,
	pub embedding: Arc<dyn EmbeddingProvider>,
}
impl Providers {
	pub fn new(chat: Arc<dyn ChatProvider>, embedding: Arc<dyn EmbeddingProvider>) -> Self {
		Self { chat, embedding }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { chat: provider.clone(), embedding: provider }
	}
}

pub struct RagService {
	pub cfg: Arc<Config>,
	pub providers: Providers,
	pub store: Arc<dyn KnowledgeStore>,
	pub maintenance: Option<Arc<dyn Maintenance>>,
	pub taxonomy: Option<Arc<Taxonomy>>,
}
impl RagService {
	pub fn new(cfg: Arc<Config>, store: Arc<dyn KnowledgeStore>) -> Self {
		Self::with_providers(cfg, Providers::default(), store)
	}

	pub fn with_providers(
		cfg: Arc<Config>,
		providers: Providers,
		store: Arc<dyn KnowledgeStore>,
	) -> Self {
		Self { cfg, providers, store, maintenance: None, taxonomy: None }
	}

	pub fn with_maintenance(mut self, maintenance: Arc<dyn Maintenance>) -> Self {
		self.maintenance = Some(maintenance);

		self
	}

	/// Installs the intent taxonomy. It is read-only for the lifetime of the service.
	pub fn with_taxonomy(mut self, taxonomy: Taxonomy) -> Self {
		self.taxonomy = Some(Arc::new(taxonomy));

		self
	}
}

struct DefaultProviders;
impl ChatProvider for DefaultProviders {
	fn generate<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok(chat::generate(cfg, messages).await?) })
	}

	fn stream<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
		sink: &'a UnboundedSender<String>,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok(chat::stream(cfg, messages, sink).await?) })
	}
}
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(embedding::embed(cfg, texts).await?) })
	}
}

/// Runs `fut` unless `cancel` fires first.
pub(crate) async fn with_cancel<T>(
	cancel: &CancellationToken,
	fut: impl Future<Output = Result<T>>,
) -> Result<T> {
	tokio::select! {
		biased;
		_ = cancel.cancelled() => Err(Error::Cancelled),
		result = fut => result,
	}
}
