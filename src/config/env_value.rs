// ABOUTME: Environment variable values passed to backend commands.
// ABOUTME: Values are literals, references to the invoking shell's environment, or secret files.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// A value for one variable in the `env:` map of `release.yml`.
///
/// ```yaml
/// env:
///   PORT: 8000
///   AWS_REGION: { env: AWS_REGION, default: eu-west-1 }
///   REGISTRY_TOKEN: { file: /run/secrets/registry-token }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    Number(serde_yaml::Number),
    Bool(bool),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
    FromFile {
        file: PathBuf,
    },
}

impl EnvValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            EnvValue::Literal(s) => Ok(s.clone()),
            EnvValue::Number(n) => Ok(n.to_string()),
            EnvValue::Bool(b) => Ok(b.to_string()),
            EnvValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(val),
                Err(_) => default
                    .clone()
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
            // Secret files usually end with a newline that must not leak into the value
            EnvValue::FromFile { file } => std::fs::read_to_string(file)
                .map(|content| content.trim_end_matches(['\r', '\n']).to_string())
                .map_err(|e| {
                    Error::InvalidConfig(format!("cannot read {}: {}", file.display(), e))
                }),
        }
    }
}

/// Resolve every value of an `env:` map, failing on the first unresolvable one.
pub fn resolve_env_map(map: &HashMap<String, EnvValue>) -> Result<HashMap<String, String>> {
    map.iter()
        .map(|(k, v)| v.resolve().map(|resolved| (k.clone(), resolved)))
        .collect()
}
