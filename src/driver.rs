//! Glue between the command line and the two workflow capabilities.
//!
//! The driver validates input, hands the parsed documents to a
//! [`WorkflowModifier`], and passes the result to a [`WorkflowSubmitter`].
//! Both are traits so the real ComfyUI implementations can be swapped for
//! fakes.

use serde_json::Value;
use std::future::Future;
use std::process::ExitCode;
use tracing::{error, info, trace};

use crate::cli::{self, Cli};
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::validate::validate;

/// Merges an options document into a workflow document.
pub trait WorkflowModifier {
    fn modify(&self, workflow: &Value, options: &Value) -> Result<Value>;
}

/// Sends a workflow to a ComfyUI server and sees it through.
pub trait WorkflowSubmitter {
    fn submit(
        &self,
        workflow: &Value,
        connection: &ConnectionConfig,
    ) -> impl Future<Output = Result<()>>;
}

/// How a run ended, short of a downstream error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The workflow was modified and submitted.
    Submitted,
    /// Help or version was printed.
    Help,
    /// Arguments were rejected.
    UsageError,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Submitted | Status::Help => 0,
            Status::UsageError => 1,
        }
    }
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        ExitCode::from(status.code())
    }
}

/// Run one invocation for already-parsed arguments.
///
/// Validation failures are logged together with the usage text and yield
/// [`Status::UsageError`]. Errors from the modifier or submitter are
/// returned untouched.
pub async fn execute<M, S>(
    cli: &Cli,
    connection: &ConnectionConfig,
    modifier: &M,
    submitter: &S,
) -> Result<Status>
where
    M: WorkflowModifier,
    S: WorkflowSubmitter,
{
    let input = match validate(cli) {
        Ok(input) => input,
        Err(errors) => {
            for message in &errors.messages {
                error!("{}", message);
            }
            error!("{}", cli::usage());
            return Ok(Status::UsageError);
        }
    };

    let workflow = modifier.modify(&input.workflow, &input.options)?;
    trace!(
        "Modified workflow:\n{}",
        serde_json::to_string_pretty(&workflow)?
    );

    info!("Submitting workflow to {}", connection.url);
    submitter.submit(&workflow, connection).await?;
    Ok(Status::Submitted)
}
