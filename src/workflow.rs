use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::driver::WorkflowModifier;
use crate::error::{ComfyError, Result};

const SAMPLER_NODES: &[&str] = &["KSampler", "KSamplerAdvanced"];
const LATENT_NODES: &[&str] = &["EmptyLatentImage", "EmptySD3LatentImage"];
const CHECKPOINT_NODES: &[&str] = &["CheckpointLoaderSimple"];
const SAVE_NODES: &[&str] = &["SaveImage"];
/// Exclusive upper bound for random seeds; keeps them valid as signed 64-bit.
const RANDOM_SEED_MAX: u64 = i64::MAX as u64;

/// Sampling seed option.
///
/// Any non-negative integer up to `u64::MAX` is used as is. A negative
/// value, conventionally `-1`, asks for a random seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Seed {
    Fixed(u64),
    Random(i64),
}

/// Overrides that can be merged into an API-format workflow.
///
/// Every field is optional. The shortcut fields target nodes by class type
/// or by graph wiring; `nodes` addresses nodes directly by id or by their
/// `_meta.title` and is applied last, so it wins over the shortcuts.
///
/// # Example
/// ```
/// use comfyui_workflow::{Seed, WorkflowOptions};
/// use serde_json::json;
///
/// let opts = WorkflowOptions::from_value(&json!({
///     "prompt": "a lighthouse at dusk",
///     "seed": 42,
///     "nodes": { "Save": { "filename_prefix": "lighthouse" } }
/// }))
/// .unwrap();
/// assert_eq!(opts.seed, Some(Seed::Fixed(42)));
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowOptions {
    /// Positive prompt text.
    #[serde(alias = "positive")]
    pub prompt: Option<String>,
    /// Negative prompt text.
    pub negative: Option<String>,
    /// Sampling seed. Negative values pick a random seed.
    pub seed: Option<Seed>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    /// Sampler algorithm (e.g. "euler", "dpmpp_2m").
    pub sampler: Option<String>,
    /// Noise scheduler (e.g. "normal", "karras").
    pub scheduler: Option<String>,
    pub denoise: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub batch_size: Option<u32>,
    /// Checkpoint file name for `CheckpointLoaderSimple`.
    pub checkpoint: Option<String>,
    /// Output file name prefix for `SaveImage`.
    pub filename_prefix: Option<String>,
    /// Raw input overrides keyed by node id or node title.
    #[serde(default)]
    pub nodes: BTreeMap<String, Map<String, Value>>,
}

impl WorkflowOptions {
    /// Interpret a JSON options document.
    pub fn from_value(options: &Value) -> Result<Self> {
        if !options.is_object() {
            return Err(ComfyError::InvalidOptions(
                "expected a JSON object".to_string(),
            ));
        }
        Self::deserialize(options).map_err(|e| ComfyError::InvalidOptions(e.to_string()))
    }
}

/// Return a copy of `workflow` with `options` applied.
///
/// `workflow` must be an API-format export: a JSON object keyed by node id
/// where each node carries `class_type` and `inputs`. The input document is
/// left untouched.
///
/// # Errors
///
/// - [`ComfyError::InvalidOptions`] when the options are not an object, have
///   an unknown key, or a value of the wrong type.
/// - [`ComfyError::InvalidWorkflow`] when the workflow is not a node map.
/// - [`ComfyError::NoMatchingNode`] when an option has nothing to apply to.
pub fn modify_workflow(workflow: &Value, options: &Value) -> Result<Value> {
    let options = WorkflowOptions::from_value(options)?;
    let mut modified = workflow.clone();
    let nodes = modified.as_object_mut().ok_or_else(|| {
        ComfyError::InvalidWorkflow(
            "expected an API-format export (a JSON object keyed by node id)".to_string(),
        )
    })?;
    apply_options(nodes, &options)?;
    Ok(modified)
}

/// [`WorkflowModifier`] backed by [`modify_workflow`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionsModifier;

impl WorkflowModifier for OptionsModifier {
    fn modify(&self, workflow: &Value, options: &Value) -> Result<Value> {
        modify_workflow(workflow, options)
    }
}

fn apply_options(nodes: &mut Map<String, Value>, options: &WorkflowOptions) -> Result<()> {
    if let Some(text) = &options.prompt {
        set_prompt_text(nodes, "prompt", "positive", text)?;
    }
    if let Some(text) = &options.negative {
        set_prompt_text(nodes, "negative", "negative", text)?;
    }

    if let Some(seed) = options.seed {
        let seed = resolve_seed(seed);
        let hits = set_inputs(nodes, "seed", Value::from(seed), |n| has_input(n, "seed"))
            + set_inputs(nodes, "noise_seed", Value::from(seed), |n| {
                has_input(n, "noise_seed")
            });
        require_hits("seed", hits)?;
    }

    let sampler_inputs = [
        ("steps", "steps", options.steps.map(Value::from)),
        ("cfg", "cfg", options.cfg.map(Value::from)),
        ("sampler", "sampler_name", options.sampler.clone().map(Value::from)),
        ("scheduler", "scheduler", options.scheduler.clone().map(Value::from)),
    ];
    for (option, input, value) in sampler_inputs {
        if let Some(value) = value {
            let hits = set_inputs(nodes, input, value, |n| is_class(n, SAMPLER_NODES));
            require_hits(option, hits)?;
        }
    }

    if let Some(denoise) = options.denoise {
        let hits = set_inputs(nodes, "denoise", Value::from(denoise), |n| {
            has_input(n, "denoise")
        });
        require_hits("denoise", hits)?;
    }

    let latent_inputs = [
        ("width", options.width),
        ("height", options.height),
        ("batch_size", options.batch_size),
    ];
    for (input, value) in latent_inputs {
        if let Some(value) = value {
            let hits = set_inputs(nodes, input, Value::from(value), |n| is_class(n, LATENT_NODES));
            require_hits(input, hits)?;
        }
    }

    if let Some(checkpoint) = &options.checkpoint {
        let hits = set_inputs(nodes, "ckpt_name", Value::from(checkpoint.as_str()), |n| {
            is_class(n, CHECKPOINT_NODES)
        });
        require_hits("checkpoint", hits)?;
    }

    if let Some(prefix) = &options.filename_prefix {
        let hits = set_inputs(nodes, "filename_prefix", Value::from(prefix.as_str()), |n| {
            is_class(n, SAVE_NODES)
        });
        require_hits("filename_prefix", hits)?;
    }

    for (key, inputs) in &options.nodes {
        override_node(nodes, key, inputs)?;
    }

    Ok(())
}

fn resolve_seed(seed: Seed) -> u64 {
    match seed {
        Seed::Fixed(seed) => seed,
        Seed::Random(_) => {
            let seed = rand::rng().random_range(0..RANDOM_SEED_MAX);
            info!("Using random seed {}", seed);
            seed
        }
    }
}

fn require_hits(option: &str, hits: usize) -> Result<()> {
    if hits == 0 {
        return Err(ComfyError::NoMatchingNode {
            option: option.to_string(),
        });
    }
    debug!("Option `{}` applied to {} node(s)", option, hits);
    Ok(())
}

fn class_type(node: &Value) -> Option<&str> {
    node.get("class_type").and_then(|v| v.as_str())
}

fn is_class(node: &Value, classes: &[&str]) -> bool {
    class_type(node).is_some_and(|c| classes.contains(&c))
}

fn has_input(node: &Value, input: &str) -> bool {
    node.get("inputs")
        .and_then(|i| i.as_object())
        .is_some_and(|i| i.contains_key(input))
}

fn title(node: &Value) -> Option<&str> {
    node.pointer("/_meta/title").and_then(|v| v.as_str())
}

/// Set `input` on every node accepted by `filter`, returning how many were touched.
fn set_inputs<F>(nodes: &mut Map<String, Value>, input: &str, value: Value, filter: F) -> usize
where
    F: Fn(&Value) -> bool,
{
    let mut hits = 0;
    for node in nodes.values_mut() {
        if !filter(&*node) {
            continue;
        }
        if let Some(inputs) = node.get_mut("inputs").and_then(|i| i.as_object_mut()) {
            inputs.insert(input.to_string(), value.clone());
            hits += 1;
        }
    }
    hits
}

/// Ids of the nodes wired into any `input` link, e.g. a sampler's `positive`.
fn linked_sources(nodes: &Map<String, Value>, input: &str) -> BTreeSet<String> {
    nodes
        .values()
        .filter_map(|node| node.get("inputs")?.get(input)?.as_array())
        .filter(|link| link.len() == 2)
        .filter_map(|link| link[0].as_str().map(String::from))
        .collect()
}

fn set_prompt_text(
    nodes: &mut Map<String, Value>,
    option: &str,
    wired_into: &str,
    text: &str,
) -> Result<()> {
    let sources = linked_sources(nodes, wired_into);
    let mut hits = 0;
    for id in &sources {
        let Some(node) = nodes.get_mut(id) else {
            continue;
        };
        if !has_input(node, "text") {
            continue;
        }
        if let Some(inputs) = node.get_mut("inputs").and_then(|i| i.as_object_mut()) {
            inputs.insert("text".to_string(), Value::from(text));
            hits += 1;
        }
    }
    require_hits(option, hits)
}

fn override_node(
    nodes: &mut Map<String, Value>,
    key: &str,
    overrides: &Map<String, Value>,
) -> Result<()> {
    let targets: Vec<String> = if nodes.contains_key(key) {
        vec![key.to_string()]
    } else {
        nodes
            .iter()
            .filter(|(_, node)| title(node) == Some(key))
            .map(|(id, _)| id.clone())
            .collect()
    };

    if targets.is_empty() {
        return Err(ComfyError::NoMatchingNode {
            option: format!("nodes.{}", key),
        });
    }

    for id in targets {
        let node = nodes
            .get_mut(&id)
            .and_then(|n| n.as_object_mut())
            .ok_or_else(|| ComfyError::InvalidWorkflow(format!("node {} is not an object", id)))?;
        let inputs = node
            .entry("inputs")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| {
                ComfyError::InvalidWorkflow(format!("node {} has non-object inputs", id))
            })?;
        for (name, value) in overrides {
            inputs.insert(name.clone(), value.clone());
        }
        debug!("Overrode {} input(s) on node {}", overrides.len(), id);
    }
    Ok(())
}
