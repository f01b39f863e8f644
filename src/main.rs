use anyhow::Context;

use crate::demo::{DemoConfig, Engine};

mod demo;

fn main() -> anyhow::Result<()> {
    log4rs::init_file("log4rs.yml", Default::default())
        .context("failed to load logging config file")?;

    #[cfg(feature = "tracing")]
    let _client = init_tracing()?;

    let config = DemoConfig::from_env().context("invalid demo configuration")?;
    log::info!("Starting with {:?}", config);

    let mut engine = Engine::new(config).context("failed to create engine")?;
    let outcome = engine.run();
    engine.shutdown().context("failed to shut down engine")?;

    if let Err(e) = &outcome {
        log::error!("{:?}", e);
    }

    outcome
}

#[cfg(feature = "tracing")]
fn init_tracing() -> anyhow::Result<tracy_client::Client> {
    use tracing_subscriber::layer::SubscriberExt;

    let client = tracy_client::Client::start();
    tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(tracing_tracy::TracyLayer::default()),
    )
    .context("failed to install tracing subscriber")?;
    Ok(client)
}
