//! `ragdesk serve`: start the HTTP chat API.

use ragdesk_config::AppConfig;

pub async fn run(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
    in_memory: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    super::require_api_key(&config)?;

    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    println!("ragdesk gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {} ({})", config.completion.model, config.completion.provider);
    if in_memory {
        println!("   Knowledge: in-memory, from {}", config.ingest.data_dir);
    } else {
        println!(
            "   Knowledge: qdrant {} / {}",
            config.qdrant.url(),
            config.qdrant.collection
        );
    }

    ragdesk_gateway::start(config, super::backend(in_memory)).await?;

    Ok(())
}
