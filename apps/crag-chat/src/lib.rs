pub mod repl;

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crag_service::{
	Providers, RagService,
	store::{QdrantKnowledgeStore, QdrantMaintenance},
};
use crag_storage::qdrant::QdrantStore;

#[derive(Debug, Parser)]
#[command(
	version = crag_cli::VERSION,
	rename_all = "kebab",
	styles = crag_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = crag_config::load(&args.config)?;

	init_tracing(&config);

	let taxonomy = match config.intents.taxonomy_path.as_deref() {
		Some(path) => Some(crag_config::load_taxonomy(path.as_ref())?),
		None => None,
	};
	let cfg = Arc::new(config);
	let qdrant = Arc::new(QdrantStore::new(&cfg.storage.qdrant)?);
	let providers = Providers::default();
	let store = QdrantKnowledgeStore::new(cfg.clone(), qdrant.clone(), providers.clone());
	let maintenance = QdrantMaintenance::new(cfg.clone(), qdrant, providers.clone());
	let mut service = RagService::with_providers(cfg, providers, Arc::new(store))
		.with_maintenance(Arc::new(maintenance));

	if let Some(taxonomy) = taxonomy {
		tracing::info!(categories = taxonomy.categories.len(), "Intent taxonomy loaded.");

		service = service.with_taxonomy(taxonomy);
	}

	let stdin = tokio::io::BufReader::new(tokio::io::stdin());

	repl::run(&service, stdin, tokio::io::stdout()).await
}

/// Logs go to stderr so they never interleave with answers on stdout.
fn init_tracing(config: &crag_config::Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
