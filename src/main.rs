use std::env;
use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use zello_usrp_bridge::bridge::BridgeController;
use zello_usrp_bridge::config::{Config, HELP};
use zello_usrp_bridge::Result;

#[tokio::main]
async fn main() -> ExitCode {
    if env::args().skip(1).any(|arg| arg == "--help" || arg == "-h") {
        print!("{HELP}");
        return ExitCode::SUCCESS;
    }

    init_logging();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(why) => {
            error!("Fatal: {why}");
            ExitCode::FAILURE
        },
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    let mut controller = BridgeController::new(config).await?;

    controller.run().await
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match env::var("LOG_FORMAT").as_deref() {
        Ok("pretty") => builder.pretty().init(),
        _ => builder.compact().init(),
    }
}
