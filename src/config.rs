//! # Configuration
//!
//! Settings are loaded from a TOML file, overridden by prefixed environment
//! variables, and `${VAR}` / `$VAR` references in string values are expanded.
//! Loading uses [figment](https://docs.rs/figment); sample files are generated
//! with [doku](https://docs.rs/doku).
//!
//! [`InstrumentationSettings`] is the section consumed by
//! [`crate::Instrumentation::from_settings`]; applications embed it in their
//! own settings struct next to [`crate::telemetry::TelemetrySettings`].

use std::path::{Path, PathBuf};

use doku::Document;
use figment::{
    providers::{Env, Format as _, Toml},
    value::{Dict, Map, Value},
    Figment, Metadata, Profile, Provider,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snafu::ResultExt as _;

use crate::handler::DEFAULT_LAYER_NAME;
use crate::{ConfigFileWriteSnafu, ConfigLoadSnafu, Error};

/// Settings for the HTTP instrumentation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Document)]
pub struct InstrumentationSettings {
    /// Layer name events are reported under. Defaults to `http`.
    #[doku(example = "http")]
    pub layer_name: Option<String>,
}

impl InstrumentationSettings {
    /// The configured layer name, or [`DEFAULT_LAYER_NAME`].
    pub fn layer_name(&self) -> &str {
        self.layer_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_LAYER_NAME)
    }
}

/// Expands `${VAR}` and `$VAR` to the value of environment variable `VAR`.
///
/// Unset variables and values not starting with `$` are returned unchanged.
///
/// ```
/// use xtrace::config::expand_env_var;
///
/// assert_eq!(expand_env_var("http"), "http");
/// assert_eq!(expand_env_var("${XTRACE_DOC_SURELY_UNSET}"), "${XTRACE_DOC_SURELY_UNSET}");
/// ```
pub fn expand_env_var(value: &str) -> String {
    let var_name = value
        .strip_prefix("${")
        .and_then(|s| s.strip_suffix('}'))
        .or_else(|| value.strip_prefix('$'));

    match var_name {
        Some(var_name) => std::env::var(var_name).unwrap_or_else(|_| value.to_string()),
        None => value.to_string(),
    }
}

fn expand_value(value: Value) -> Value {
    match value {
        Value::String(tag, s) => Value::String(tag, expand_env_var(&s)),
        Value::Dict(tag, dict) => Value::Dict(tag, expand_dict(dict)),
        Value::Array(tag, arr) => Value::Array(tag, arr.into_iter().map(expand_value).collect()),
        other => other,
    }
}

fn expand_dict(dict: Dict) -> Dict {
    dict.into_iter().map(|(k, v)| (k, expand_value(v))).collect()
}

/// Figment provider serving another figment's data with env references expanded.
struct EnvExpander {
    data: Map<Profile, Dict>,
}

impl EnvExpander {
    fn from_figment(figment: &Figment) -> Result<Self, figment::Error> {
        let data = figment
            .data()?
            .into_iter()
            .map(|(profile, dict)| (profile, expand_dict(dict)))
            .collect();
        Ok(Self { data })
    }
}

impl Provider for EnvExpander {
    fn metadata(&self) -> Metadata {
        Metadata::named("env-expander")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Ok(self.data.clone())
    }
}

/// Writes a documented sample configuration for `C` to `config_path`.
///
/// # Errors
/// - `ConfigFileWrite` if the file cannot be written.
pub fn create_config_file<C>(config_path: impl Into<PathBuf>) -> Result<(), Error>
where
    C: doku::Document,
{
    let path = config_path.into();
    let config_contents = doku::to_toml::<C>();
    std::fs::write(&path, config_contents).with_context(|_| ConfigFileWriteSnafu { path })?;
    Ok(())
}

/// Loaded and merged configuration.
///
/// Precedence, lowest first: the TOML file, then environment variables
/// starting with the prefix. Nesting in variable names uses `__`, so
/// `APP_INSTRUMENTATION__LAYER_NAME=axum` overrides `instrumentation.layer_name`.
pub struct Config<C> {
    /// The merged configuration.
    pub config: C,
}

impl<C> Config<C>
where
    C: DeserializeOwned,
{
    /// Loads configuration from `config_path` and `env_prefix`ed variables.
    ///
    /// # Errors
    /// - `ConfigLoad` if the file cannot be read or the merged data does not fit `C`.
    pub fn new<P, E>(config_path: Option<P>, env_prefix: Option<E>) -> Result<Self, Error>
    where
        P: AsRef<Path>,
        E: AsRef<str>,
    {
        let f = Figment::new();

        let f = match config_path {
            Some(config_file) => f.merge(Toml::file(config_file.as_ref())),
            None => f,
        };

        let f = match env_prefix {
            Some(env_prefix) => f.merge(Env::prefixed(env_prefix.as_ref()).split("__")),
            None => f,
        };

        let expander = EnvExpander::from_figment(&f)
            .map_err(Box::new)
            .context(ConfigLoadSnafu)?;
        let config = Figment::from(expander)
            .extract()
            .map_err(Box::new)
            .context(ConfigLoadSnafu)?;

        Ok(Self { config })
    }
}
