use clap::Parser;
use env_logger::Env;

use tcode_bridge_lib::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = tcode_bridge_lib::run(settings, cli.select_port).await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
