use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use tracing::warn;

use crate::combin::job_count;
use crate::errors::PerfnpError;
use crate::types::Parameter;

/// Validated experiment description.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Absolute or relative path to the executed binary.
    pub command: String,
    /// Argument template; may contain `%name%` placeholders.
    pub arguments: Vec<String>,
    /// Parameters in declaration order.
    pub parameters: Vec<Parameter>,
    /// Time limit for one job in seconds, `0` for none.
    pub timeout: u32,
    /// File name for the CSV job log.
    pub job_csv: Option<PathBuf>,
    /// Ledger database used for resuming.
    pub database: Option<PathBuf>,
    /// Config text as it was read, stored with every run.
    pub source: String,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    command: String,
    arguments: Vec<String>,
    timeout: u32,
    #[serde(default)]
    parameters: Option<RawParameters>,
    #[serde(default)]
    logging: Option<RawLogging>,
    #[serde(default)]
    database: Option<PathBuf>,
}

/// `"name": "value"` is shorthand for `"name": ["value"]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawValues {
    One(String),
    Many(Vec<String>),
}

/// Parameter map in document order. Unlike a plain map, a repeated name is
/// an error instead of silently replacing the earlier values.
#[derive(Debug)]
struct RawParameters(IndexMap<String, RawValues>);

impl<'de> Deserialize<'de> for RawParameters {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ParametersVisitor;

        impl<'de> Visitor<'de> for ParametersVisitor {
            type Value = RawParameters;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map from parameter names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, values)) = access.next_entry::<String, RawValues>()? {
                    if map.contains_key(&name) {
                        return Err(de::Error::custom(format!(
                            "duplicate parameter '{}'",
                            name
                        )));
                    }
                    map.insert(name, values);
                }
                Ok(RawParameters(map))
            }
        }

        deserializer.deserialize_map(ParametersVisitor)
    }
}

#[derive(Debug, Deserialize)]
struct RawLogging {
    job: Option<RawJobLogging>,
}

#[derive(Debug, Deserialize)]
struct RawJobLogging {
    csv: Option<PathBuf>,
}

impl Config {
    /// Reads a config file; `.toml` files are parsed as TOML, everything else as JSON.
    pub fn load(path: &Path) -> Result<Self, PerfnpError> {
        let text = std::fs::read_to_string(path).map_err(|source| PerfnpError::ConfigReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
        let raw: RawConfig = if is_toml {
            toml::from_str(&text).map_err(|e| PerfnpError::ConfigParseError {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?
        } else {
            serde_json::from_str(&text).map_err(|e| PerfnpError::ConfigParseError {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?
        };

        Self::from_raw(raw, text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, PerfnpError> {
        let raw: RawConfig =
            serde_json::from_str(text).map_err(|e| PerfnpError::InvalidConfig {
                detail: e.to_string(),
            })?;
        Self::from_raw(raw, text.to_string())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, PerfnpError> {
        let raw: RawConfig = toml::from_str(text).map_err(|e| PerfnpError::InvalidConfig {
            detail: e.to_string(),
        })?;
        Self::from_raw(raw, text.to_string())
    }

    fn from_raw(raw: RawConfig, source: String) -> Result<Self, PerfnpError> {
        if raw.command.is_empty() {
            return Err(invalid("the \"command\" field is empty"));
        }

        let parameters = match raw.parameters {
            None => Vec::new(),
            Some(RawParameters(map)) => parse_parameters(map)?,
        };

        for param in &parameters {
            let placeholder = format!("%{}%", param.name);
            if !raw.arguments.iter().any(|a| a.contains(&placeholder)) {
                warn!(parameter = %param.name, "parameter is not referenced by any argument");
            }
        }

        Ok(Config {
            command: raw.command,
            arguments: raw.arguments,
            parameters,
            timeout: raw.timeout,
            job_csv: raw.logging.and_then(|l| l.job).and_then(|j| j.csv),
            database: raw.database,
            source,
        })
    }
}

fn parse_parameters(map: IndexMap<String, RawValues>) -> Result<Vec<Parameter>, PerfnpError> {
    if map.is_empty() {
        return Err(invalid("the \"parameters\" map is empty"));
    }

    let mut out = Vec::with_capacity(map.len());
    for (name, values) in map {
        if name.is_empty() {
            return Err(invalid("one parameter's name is empty"));
        }
        let values = match values {
            RawValues::One(v) => vec![v],
            RawValues::Many(vs) => vs,
        };
        if values.is_empty() {
            return Err(invalid(&format!(
                "parameter '{}' must have at least 1 value",
                name
            )));
        }
        out.push(Parameter::new(name, values));
    }

    if job_count(&out).is_none() {
        return Err(invalid(&format!(
            "the parameters expand to more than {} jobs",
            u32::MAX
        )));
    }
    Ok(out)
}

fn invalid(detail: &str) -> PerfnpError {
    PerfnpError::InvalidConfig {
        detail: detail.to_string(),
    }
}
