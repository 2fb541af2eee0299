use clap::Parser;
use std::process::ExitCode;

use comfyui_workflow::cli::handle_parse_error;
use comfyui_workflow::{execute, logging, Cli, ComfyUiSubmitter, ConnectionConfig, OptionsModifier};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            logging::init(false);
            return Ok(handle_parse_error(err).into());
        }
    };

    logging::init(cli.verbose);

    let connection = ConnectionConfig::from_env();
    let status = execute(&cli, &connection, &OptionsModifier, &ComfyUiSubmitter::default()).await?;
    Ok(status.into())
}
