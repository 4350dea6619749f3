use anyhow::Result;
use tracing::info;

use roulette_rs::{ChatServer, cli};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args()?;
    let mut server = ChatServer::from_config_file(&args.config_file).await?;

    if args.config_test {
        server.init().await?;
        server.verify().await?;
        info!("config file {} ok", args.config_file);
        return Ok(());
    }

    info!(
        "roulette-rs {} starting with log level {}",
        roulette_rs::VERSION,
        args.log_level
    );
    server.run().await
}
