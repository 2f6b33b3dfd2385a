use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use generatio::generation::registry;
use generatio::{AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config)?;
    tracing::info!("✅ AppState initialized");

    for model in registry::list_models() {
        tracing::info!(
            "🎨 Model {} ({}): {} per image, {} parameters",
            model.name,
            model.display_name,
            model.cost_per_unit,
            model.parameters.len()
        );
    }

    state.reaper.start();
    tracing::info!("✅ All systems operational");

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutdown requested");

    state.reaper.stop().await;
    let cleared = state.broker.clear().await;
    tracing::info!("✅ Cleared {} session(s), goodbye", cleared);

    Ok(())
}
