//! Loading of the image definition file.
//!
//! The file is a nested YAML mapping: every mapping value below an image is
//! a child image, scalar keys carry the image's own settings, and the
//! top-level `configuration` key holds the global settings. Loading only
//! produces [`RawNode`] values; invariants are checked when the
//! [`ImageTree`](crate::tree::ImageTree) is built from them.

use crate::constants::{DEFAULT_BRANCH, DEFAULT_BUILDER, DEFAULT_ISO_DIR};
use crate::error::VaubanError;
use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

pub const CONFIGURATION_KEY: &str = "configuration";

/// Global settings shared by every image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Configuration steps never replayed by the conffs stage
    pub ignore_stage_in_conffs: Vec<String>,
    /// Configuration steps always run first by the conffs stage
    pub always_apply_stage_in_conffs: Vec<String>,
    /// Images whose layers are never uploaded
    pub never_upload: Vec<String>,
    pub builder: String,
    pub iso_dir: PathBuf,
    pub default_branch: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            ignore_stage_in_conffs: Vec::new(),
            always_apply_stage_in_conffs: Vec::new(),
            never_upload: Vec::new(),
            builder: DEFAULT_BUILDER.to_string(),
            iso_dir: PathBuf::from(DEFAULT_ISO_DIR),
            default_branch: DEFAULT_BRANCH.to_string(),
        }
    }
}

/// Options applied when a scheduled build fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    pub stage: Stage,
    pub build_parents: i32,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            stage: Stage::All,
            build_parents: 0,
        }
    }
}

/// One image definition as written in the file, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawNode {
    pub key: String,
    /// Dotted location in the file, used in error messages
    pub path: String,
    pub name: Option<String>,
    pub stages: Vec<String>,
    pub conffs: Option<String>,
    pub branch: Option<String>,
    pub url: Option<String>,
    pub sha512sums: Option<String>,
    pub schedule: Option<String>,
    pub schedule_options: Option<ScheduleOptions>,
    pub children: Vec<RawNode>,
}

/// Parsed definition file.
#[derive(Debug, Clone, Default)]
pub struct VaubanConfig {
    pub global: GlobalConfig,
    pub roots: Vec<RawNode>,
}

impl VaubanConfig {
    pub fn load(path: &Path) -> Result<Self, VaubanError> {
        let content = std::fs::read_to_string(path).map_err(|source| VaubanError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, VaubanError> {
        let document: Value = serde_yaml::from_str(content)?;
        let mapping = match document {
            Value::Mapping(m) => m,
            Value::Null => Mapping::new(),
            _ => {
                return Err(VaubanError::structural(
                    "<root>",
                    "top level must be a mapping",
                ))
            }
        };

        let mut config = VaubanConfig::default();
        for (key, value) in mapping {
            let key = key_string(&key, "<root>")?;
            if key == CONFIGURATION_KEY {
                if !value.is_null() {
                    config.global = serde_yaml::from_value(value)?;
                }
                continue;
            }
            match value {
                Value::Mapping(m) => config.roots.push(RawNode::from_mapping(&key, &key, m)?),
                _ => {
                    return Err(VaubanError::structural(
                        key,
                        "release definitions must be mappings",
                    ))
                }
            }
        }
        Ok(config)
    }
}

impl RawNode {
    fn from_mapping(key: &str, path: &str, mapping: Mapping) -> Result<Self, VaubanError> {
        let mut node = RawNode {
            key: key.to_string(),
            path: path.to_string(),
            ..Default::default()
        };

        for (field, value) in mapping {
            let field = key_string(&field, path)?;
            match field.as_str() {
                "stages" => node.stages = string_list(value, path, "stages")?,
                "name" => node.name = optional_string(value, path, "name")?,
                "conffs" => node.conffs = optional_string(value, path, "conffs")?,
                "branch" => node.branch = optional_string(value, path, "branch")?,
                "url" => node.url = optional_string(value, path, "url")?,
                "sha512sums" => node.sha512sums = optional_string(value, path, "sha512sums")?,
                "schedule" => node.schedule = optional_string(value, path, "schedule")?,
                "schedule_options" => {
                    node.schedule_options = match value {
                        Value::Null => None,
                        other => Some(serde_yaml::from_value(other)?),
                    }
                }
                _ => match value {
                    Value::Mapping(child) => {
                        let child_path = format!("{}.{}", path, field);
                        node.children
                            .push(RawNode::from_mapping(&field, &child_path, child)?);
                    }
                    _ => tracing::debug!(path, field = %field, "ignoring unknown scalar key"),
                },
            }
        }
        Ok(node)
    }
}

fn key_string(key: &Value, path: &str) -> Result<String, VaubanError> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(VaubanError::structural(path, "keys must be strings")),
    }
}

fn optional_string(value: Value, path: &str, field: &str) -> Result<Option<String>, VaubanError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        _ => Err(VaubanError::structural(
            path,
            format!("`{}` must be a string", field),
        )),
    }
}

fn string_list(value: Value, path: &str, field: &str) -> Result<Vec<String>, VaubanError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items
            .into_iter()
            .map(|item| {
                optional_string(item, path, field)?.ok_or_else(|| {
                    VaubanError::structural(path, format!("`{}` contains an empty entry", field))
                })
            })
            .collect(),
        _ => Err(VaubanError::structural(
            path,
            format!("`{}` must be a list", field),
        )),
    }
}
