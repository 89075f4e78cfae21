use {
    anyhow::Result,
    blobcrypt::{
        cli::{Cli, Command, default_config_path},
        config::Config,
        generate_key, run, setup_logger, term,
    },
    clap::Parser,
    std::process,
    tracing::error,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.command == Command::GenerateKey {
        return generate_key();
    }
    let config_file = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::load(&config_file)?;
    setup_logger(config.log_file.as_deref(), &config.log_filter)?;

    if let Err(err) = run(cli.command, config).await {
        term::clear_status();
        error!("{err:?}");
        process::exit(1);
    }
    Ok(())
}
