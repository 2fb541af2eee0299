//! Command-line surface of `comfyui-workflow`.

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use tracing::error;

use crate::driver::Status;

const ENVIRONMENT_HELP: &str = "\
The app reads the following environment variables:
  COMFYUI_URL: The URL of the ComfyUI server (default http://localhost:8188).
  COMFYUI_USERNAME: The username for basic auth.
  COMFYUI_PASSWORD: The password for basic auth.";

/// Generates image(s) using ComfyUI, with the workflow modified to use the given options.
#[derive(Parser, Debug, Clone)]
#[command(name = "comfyui-workflow")]
#[command(version, about, long_about = None)]
#[command(after_help = ENVIRONMENT_HELP)]
pub struct Cli {
    /// Workflow exported from ComfyUI in API format
    #[arg(value_name = "export-api.json")]
    pub workflow: Option<PathBuf>,

    /// The options to modify the workflow with, in JSON format
    #[arg(short, long, value_name = "json", default_value = "{}")]
    pub options: String,

    /// Enable trace-level logging, including the modified workflow
    #[arg(short, long)]
    pub verbose: bool,
}

/// Full usage text, as printed by `--help`.
pub fn usage() -> String {
    Cli::command().render_help().to_string()
}

/// Map an argument parsing failure onto the exit-code contract.
///
/// `--help` and `--version` print to stdout and succeed. Anything else is a
/// usage error: the parser's message and the usage text are logged.
pub fn handle_parse_error(err: clap::Error) -> Status {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = err.print();
            Status::Help
        }
        _ => {
            error!("{}", err.render().to_string().trim_end());
            error!("{}", usage());
            Status::UsageError
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // https://docs.rs/clap/latest/clap/_derive/_tutorial/index.html#testing
    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["comfyui-workflow", "flow.json"]).unwrap();
        assert_eq!(cli.workflow, Some(PathBuf::from("flow.json")));
        assert_eq!(cli.options, "{}");
        assert!(!cli.verbose);
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::try_parse_from(["comfyui-workflow", "-v", "-o", r#"{"seed":1}"#, "f.json"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.options, r#"{"seed":1}"#);
        assert_eq!(cli.workflow, Some(PathBuf::from("f.json")));
    }

    #[test]
    fn test_long_flags() {
        let cli = Cli::try_parse_from([
            "comfyui-workflow",
            "--verbose",
            "--options",
            "{}",
            "f.json",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.options, "{}");
    }

    #[test]
    fn test_workflow_is_optional_at_parse_time() {
        let cli = Cli::try_parse_from(["comfyui-workflow"]).unwrap();
        assert!(cli.workflow.is_none());
    }

    #[test]
    fn test_help_maps_to_success() {
        let err = Cli::try_parse_from(["comfyui-workflow", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert_eq!(handle_parse_error(err), Status::Help);

        let err = Cli::try_parse_from(["comfyui-workflow", "-h", "missing.json"]).unwrap_err();
        assert_eq!(handle_parse_error(err), Status::Help);
    }

    #[test]
    fn test_unknown_flag_is_usage_error() {
        let err = Cli::try_parse_from(["comfyui-workflow", "--bogus"]).unwrap_err();
        assert_eq!(handle_parse_error(err), Status::UsageError);
    }

    #[test]
    fn test_usage_mentions_environment() {
        let text = usage();
        assert!(text.contains("--options"));
        assert!(text.contains("COMFYUI_URL"));
        assert!(text.contains("COMFYUI_PASSWORD"));
    }
}
