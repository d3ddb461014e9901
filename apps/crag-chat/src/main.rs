use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = crag_chat::Args::parse();

	crag_chat::run(args).await
}
