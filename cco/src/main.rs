use args::Args;
use clap::Parser;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = config::Config::load(&args.config)?;

    if let Some(host) = args.host {
        config.server.host = host;
    }

    if let Some(port) = args.port {
        config.server.port = port;
    }

    let listen_address = config.server.listen_address()?;

    let shutdown_signal = CancellationToken::new();

    {
        let token = shutdown_signal.clone();

        tokio::spawn(async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {error}");
                return;
            }

            token.cancel();
        });
    }

    server::serve(ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter: args.log_level,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
    .await
}
