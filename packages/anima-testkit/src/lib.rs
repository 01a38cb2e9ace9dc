//! Test infrastructure for the integration suites: every test gets its
//! own throwaway Postgres database, and qdrant collections created during
//! the test are registered for deletion afterwards. Both halves are gated
//! on environment variables (`ANIMA_PG_DSN`, `ANIMA_QDRANT_URL`); suites
//! skip themselves when either is unset.

mod error;

pub use error::{Error, Result};

use std::{collections::HashSet, env, str::FromStr, sync::Mutex, thread, time::Duration};

use qdrant_client::Qdrant;
use sqlx::{
	ConnectOptions, Connection,
	postgres::{PgConnectOptions, PgConnection},
};
use tokio::runtime::Builder;
use uuid::Uuid;

/// The maintenance database used to create and drop test databases.
const ADMIN_DATABASE: &str = "postgres";
/// Attempts per tracked collection before its deletion is reported.
const COLLECTION_DELETE_ATTEMPTS: u32 = 3;
const COLLECTION_DELETE_PAUSE: Duration = Duration::from_millis(250);

pub fn env_dsn() -> Option<String> {
	env::var("ANIMA_PG_DSN").ok()
}

pub fn env_qdrant_url() -> Option<String> {
	env::var("ANIMA_QDRANT_URL").ok()
}

pub struct TestDatabase {
	name: String,
	dsn: String,
	admin_options: PgConnectOptions,
	collections: Mutex<HashSet<String>>,
	cleaned: bool,
}

impl TestDatabase {
	pub async fn new(base_dsn: &str) -> Result<Self> {
		let base_options = PgConnectOptions::from_str(base_dsn)
			.map_err(|err| Error::Message(format!("ANIMA_PG_DSN did not parse: {err}.")))?;
		let admin_options = base_options.clone().database(ADMIN_DATABASE);
		let name = format!("anima_test_{}", Uuid::new_v4().simple());
		let mut admin = connect(&admin_options).await?;

		sqlx::query(&format!(r#"CREATE DATABASE "{name}""#))
			.execute(&mut admin)
			.await
			.map_err(|err| Error::Message(format!("CREATE DATABASE {name} failed: {err}.")))?;

		let dsn = base_options.database(&name).to_url_lossy().to_string();

		Ok(Self {
			name,
			dsn,
			admin_options,
			collections: Mutex::new(HashSet::new()),
			cleaned: false,
		})
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	/// Registers a qdrant collection the test created so teardown removes
	/// it alongside the database.
	pub fn track_collection(&self, collection: &str) {
		let mut tracked = self.collections.lock().unwrap_or_else(|err| err.into_inner());

		tracked.insert(collection.to_string());
	}

	pub async fn cleanup(mut self) -> Result<()> {
		self.teardown().await
	}

	async fn teardown(&mut self) -> Result<()> {
		if self.cleaned {
			return Ok(());
		}

		let collections: Vec<String> = {
			let tracked = self.collections.lock().unwrap_or_else(|err| err.into_inner());

			tracked.iter().cloned().collect()
		};
		let collections_result = drop_collections(&collections).await;
		let database_result = drop_database(&self.name, &self.admin_options).await;

		collections_result?;
		database_result?;

		self.cleaned = true;

		Ok(())
	}
}

impl Drop for TestDatabase {
	fn drop(&mut self) {
		if self.cleaned {
			return;
		}

		// A test that panicked (or forgot cleanup) still gets a best-effort
		// teardown; async work needs its own runtime on a fresh thread.
		let name = self.name.clone();
		let admin_options = self.admin_options.clone();
		let collections: Vec<String> = {
			let tracked = self.collections.lock().unwrap_or_else(|err| err.into_inner());

			tracked.iter().cloned().collect()
		};
		let teardown = thread::spawn(move || {
			let runtime = Builder::new_current_thread()
				.enable_all()
				.build()
				.map_err(|err| Error::Message(format!("Teardown runtime failed: {err}.")))?;

			runtime.block_on(async {
				let collections_result = drop_collections(&collections).await;

				drop_database(&name, &admin_options).await?;

				collections_result
			})
		});

		match teardown.join() {
			Ok(Ok(())) => {},
			Ok(Err(err)) => eprintln!("Test teardown incomplete: {err}."),
			Err(_) => eprintln!("Test teardown thread panicked."),
		}
	}
}

async fn connect(options: &PgConnectOptions) -> Result<PgConnection> {
	PgConnection::connect_with(options).await.map_err(|err| {
		Error::Message(format!("Could not reach the {ADMIN_DATABASE} database: {err}."))
	})
}

async fn drop_database(name: &str, admin_options: &PgConnectOptions) -> Result<()> {
	let mut admin = connect(admin_options).await?;

	// Lingering pool connections from the test would block the drop.
	let _ = sqlx::query(
		"\
SELECT pg_terminate_backend(pid)
FROM pg_stat_activity
WHERE datname = $1 AND pid <> pg_backend_pid()",
	)
	.bind(name)
	.fetch_all(&mut admin)
	.await;

	sqlx::query(&format!(r#"DROP DATABASE IF EXISTS "{name}""#))
		.execute(&mut admin)
		.await
		.map_err(|err| Error::Message(format!("DROP DATABASE {name} failed: {err}.")))?;

	Ok(())
}

/// Deletes tracked collections, retrying each a few times. An absent
/// collection counts as deleted; everything else is collected and
/// reported at the end so one stubborn collection does not hide the rest.
async fn drop_collections(collections: &[String]) -> Result<()> {
	if collections.is_empty() {
		return Ok(());
	}

	let Some(qdrant_url) = env_qdrant_url() else {
		eprintln!("Leaving qdrant collections behind; set ANIMA_QDRANT_URL to clean them up.");

		return Ok(());
	};
	let client = Qdrant::from_url(&qdrant_url)
		.build()
		.map_err(|err| Error::Message(format!("Qdrant client setup failed: {err}.")))?;
	let mut leftovers = Vec::new();

	for collection in collections {
		let mut attempt = 1;

		loop {
			match client.delete_collection(collection.clone()).await {
				Ok(_) => break,
				Err(err) if is_absent(&err) => break,
				Err(_) if attempt < COLLECTION_DELETE_ATTEMPTS => {
					attempt += 1;

					tokio::time::sleep(COLLECTION_DELETE_PAUSE).await;
				},
				Err(err) => {
					leftovers.push(format!("{collection} ({err})"));

					break;
				},
			}
		}
	}

	if leftovers.is_empty() {
		Ok(())
	} else {
		Err(Error::Message(format!("Collections left behind: {}.", leftovers.join(", "))))
	}
}

fn is_absent(err: &qdrant_client::QdrantError) -> bool {
	let message = err.to_string().to_lowercase();

	message.contains("not found") || message.contains("doesn't exist")
}
