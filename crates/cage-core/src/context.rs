//! Deploy-context loading.
//!
//! A deploy context is a directory holding `service.json` (the full
//! creation request for the next service) and `task-definition.json`
//! (the registration request for the next task definition). Both files
//! go through `${NAME}` environment-variable templating before parsing:
//! plain string replacement, no nesting, undefined names become the
//! empty string with a warning.

use std::path::Path;

use regex::Regex;
use tracing::warn;

use crate::config::{DeployConfig, TaskDefinitionSource};
use crate::error::{ConfigError, ConfigResult};
use crate::types::{ServiceSpec, TaskDefinitionSpec};

const SERVICE_FILE: &str = "service.json";
const TASK_DEFINITION_FILE: &str = "task-definition.json";

/// Load a deploy context directory into a partial [`DeployConfig`].
///
/// `service.json` is required; `task-definition.json` is optional when a
/// precomputed task-definition ARN is supplied by flag or environment.
/// The cluster is seeded from the service payload and may be overridden
/// later; the *current* service name always comes from flag or
/// environment, since the payload names the next service.
pub fn load_deploy_context(dir: &Path) -> ConfigResult<DeployConfig> {
    let service_path = dir.join(SERVICE_FILE);
    if !service_path.is_file() {
        return Err(ConfigError::MissingContext {
            dir: dir.to_path_buf(),
            file: SERVICE_FILE,
        });
    }
    let service_spec: ServiceSpec = read_json_with_envars(&service_path)?;

    let task_definition_path = dir.join(TASK_DEFINITION_FILE);
    let task_definition = if task_definition_path.is_file() {
        let spec: TaskDefinitionSpec = read_json_with_envars(&task_definition_path)?;
        Some(TaskDefinitionSource::Register(spec))
    } else {
        None
    };

    Ok(DeployConfig {
        cluster: service_spec.cluster.clone(),
        service_spec: Some(service_spec),
        task_definition,
        ..DeployConfig::default()
    })
}

/// Read a file and substitute `${NAME}` literals from the process
/// environment.
pub fn read_file_and_apply_envars(path: &Path) -> ConfigResult<String> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(apply_envars(&raw, path, |name| std::env::var(name).ok()))
}

fn read_json_with_envars<T: serde::de::DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let templated = read_file_and_apply_envars(path)?;
    serde_json::from_str(&templated).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Plain-string `${NAME}` substitution. Undefined names substitute the
/// empty string with a warning; replacement is global and not nested.
fn apply_envars(input: &str, path: &Path, lookup: impl Fn(&str) -> Option<String>) -> String {
    // Unwrap is fine: the pattern is a compile-time constant.
    let pattern = Regex::new(r"\$\{(.+?)\}").unwrap();
    let mut output = input.to_string();
    for capture in pattern.captures_iter(input) {
        let literal = &capture[0];
        let name = &capture[1];
        let value = match lookup(name) {
            Some(value) => value,
            None => {
                warn!(
                    "envar literal '{literal}' found in {} but was not defined. filled by empty string",
                    path.display()
                );
                String::new()
            }
        };
        output = output.replace(literal, &value);
    }
    output
}
