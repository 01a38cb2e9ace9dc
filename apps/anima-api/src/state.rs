use std::sync::Arc;

use anima_config::Config;
use anima_index::IndexStore;
use anima_service::{AnimaService, Providers};
use anima_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<AnimaService>,
}

impl AppState {
	pub async fn new(config: Config) -> color_eyre::Result<Self> {
		Self::with_providers(config, Providers::default()).await
	}

	pub async fn with_providers(
		config: Config,
		providers: Providers,
	) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		let index = Arc::new(IndexStore::new(&config.storage.qdrant)?);
		let service = Arc::new(AnimaService::with_providers(config, db, index, providers));

		Ok(Self { service })
	}
}
