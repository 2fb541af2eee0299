use serde_json::Value;
use std::path::Path;

use crate::cli::Cli;

/// Parsed documents ready to be modified and submitted.
#[derive(Debug, Clone)]
pub struct ValidatedInput {
    pub workflow: Value,
    pub options: Value,
}

/// Every problem found with the command-line input, in check order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub messages: Vec<String>,
}

impl ValidationErrors {
    fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Check the options string and the workflow file.
///
/// All checks run and their failures accumulate. The file checks depend on
/// each other: existence is only checked when a name was given, and the
/// contents only when the file exists.
pub fn validate(cli: &Cli) -> Result<ValidatedInput, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if cli.options.is_empty() {
        errors.push("Options are required");
    }
    let options = serde_json::from_str::<Value>(&cli.options).ok();
    if options.is_none() {
        errors.push("Options must be valid JSON");
    }

    let workflow = match &cli.workflow {
        None => {
            errors.push("A workflow file is required");
            None
        }
        Some(path) => read_workflow(path, &mut errors),
    };

    match (workflow, options) {
        (Some(workflow), Some(options)) if errors.is_empty() => {
            Ok(ValidatedInput { workflow, options })
        }
        _ => Err(errors),
    }
}

fn read_workflow(path: &Path, errors: &mut ValidationErrors) -> Option<Value> {
    if !path.exists() {
        errors.push(format!(
            "The workflow file {} does not exist",
            path.display()
        ));
        return None;
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            errors.push(format!(
                "The workflow file {} could not be read: {}",
                path.display(),
                e
            ));
            return None;
        }
    };

    match serde_json::from_str::<Value>(&raw) {
        Ok(workflow) => Some(workflow),
        Err(e) => {
            errors.push(format!("The workflow file must be valid JSON ({})", e));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["comfyui-workflow"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn workflow_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_input() {
        let file = workflow_file(r#"{"1": {"class_type": "SaveImage", "inputs": {}}}"#);
        let path = file.path().to_str().unwrap();
        let input = validate(&cli(&["-o", r#"{"seed": 5}"#, path])).unwrap();
        assert_eq!(input.workflow["1"]["class_type"], "SaveImage");
        assert_eq!(input.options["seed"], 5);
    }

    #[test]
    fn test_empty_options_reports_both_checks() {
        let file = workflow_file("{}");
        let errors = validate(&cli(&["-o", "", file.path().to_str().unwrap()])).unwrap_err();
        assert_eq!(
            errors.messages,
            vec!["Options are required", "Options must be valid JSON"]
        );
    }

    #[test]
    fn test_bad_options_json() {
        let file = workflow_file("{}");
        let errors = validate(&cli(&["-o", "{bad", file.path().to_str().unwrap()])).unwrap_err();
        assert_eq!(errors.messages, vec!["Options must be valid JSON"]);
    }

    #[test]
    fn test_missing_filename() {
        let errors = validate(&cli(&[])).unwrap_err();
        assert_eq!(errors.messages, vec!["A workflow file is required"]);
    }

    #[test]
    fn test_nonexistent_file_mentions_path() {
        let errors = validate(&cli(&["/no/such/dir/flow.json"])).unwrap_err();
        assert_eq!(errors.messages.len(), 1);
        assert!(errors.messages[0].contains("/no/such/dir/flow.json"));
        assert!(errors.messages[0].contains("does not exist"));
    }

    #[test]
    fn test_invalid_workflow_json() {
        let file = workflow_file("{ not json");
        let errors = validate(&cli(&[file.path().to_str().unwrap()])).unwrap_err();
        assert_eq!(errors.messages.len(), 1);
        assert!(errors.messages[0].starts_with("The workflow file must be valid JSON"));
    }

    #[test]
    fn test_errors_accumulate() {
        let file = workflow_file("[[[");
        let errors = validate(&cli(&["-o", "nope", file.path().to_str().unwrap()])).unwrap_err();
        assert_eq!(errors.messages.len(), 2);
        assert_eq!(errors.messages[0], "Options must be valid JSON");
        assert!(errors.messages[1].starts_with("The workflow file must be valid JSON"));

        let errors = validate(&cli(&["-o", "nope"])).unwrap_err();
        assert_eq!(
            errors.messages,
            vec!["Options must be valid JSON", "A workflow file is required"]
        );
    }
}
