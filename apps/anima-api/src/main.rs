use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = anima_api::Args::parse();

	anima_api::run(args).await
}
