use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use stockledger_infra::LedgerConfig;
use stockledger_infra::ledger_store::schema;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = LedgerConfig::load().context("failed to load configuration")?;
    stockledger_observability::init(&config.logging);

    let url = config
        .database
        .url
        .as_deref()
        .context("STOCKLEDGER__DATABASE__URL must be set to run migrations")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .context("failed to connect to postgres")?;

    schema::migrate(&pool).await?;
    tracing::info!("stock ledger schema is up to date");
    Ok(())
}
