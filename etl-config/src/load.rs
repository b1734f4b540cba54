use std::{
    io,
    path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Extensions the loader knows how to parse.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml"];

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator between environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Separator for list elements in environment variables.
const LIST_SEPARATOR: &str = ",";

/// Trait implemented by configuration structures that require list parsing help.
pub trait Config {
    /// Keys whose values should be parsed as lists when loading the configuration.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while parsing the configuration file itself.
#[derive(Debug, Error)]
pub enum FileFormatError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// Errors that can occur while loading a configuration file and its overrides.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// The configuration file passed on the command line does not exist.
    #[error("configuration file `{0}` does not exist")]
    MissingConfigurationFile(PathBuf),

    /// The configuration file has an extension the loader cannot parse.
    #[error("configuration file `{path}` has an unsupported extension; expected one of: {expected}")]
    UnsupportedExtension { path: PathBuf, expected: String },

    /// Failed to read the configuration file.
    #[error("failed to read configuration file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file existed but could not be parsed.
    #[error("failed to load configuration from `{path}`: {source}")]
    ConfigurationFileLoad {
        path: PathBuf,
        #[source]
        source: FileFormatError,
    },

    /// Environment variable overrides could not be read.
    #[error("failed to load configuration from environment variables: {0}")]
    EnvironmentVariables(#[source] config::ConfigError),

    /// The sources were merged but deserialization into the target type failed.
    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] serde_json::Error),
}

/// Loads configuration from a single file, then applies `APP_`-prefixed environment overrides.
///
/// The file format is picked from the extension (`json`, `yaml`/`yml` or `toml`) and keys are
/// kept exactly as written, so queries, projections, mappings and task names keep their case.
/// Nested keys are addressed with double underscores
/// (`APP_CONTROLS__ELASTICSEARCH_BULK_SIZE=500`); overrides always use the snake_case field
/// name and replace a camelCase spelling of the same key in the file. List values listed in
/// [`Config::LIST_PARSE_KEYS`] are comma-separated.
pub fn load_config_from_path<T>(path: impl AsRef<Path>) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let path = path.as_ref();
    let format = check_configuration_file(path)?;

    let contents = std::fs::read_to_string(path).map_err(|source| LoadConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings =
        parse_file(format, &contents).map_err(|source| LoadConfigError::ConfigurationFileLoad {
            path: path.to_path_buf(),
            source,
        })?;

    let overrides = config::Config::builder()
        .add_source(environment_source::<T>())
        .build()
        .and_then(|overrides| overrides.try_deserialize::<Value>())
        .map_err(LoadConfigError::EnvironmentVariables)?;
    merge_overrides(&mut settings, overrides);

    serde_json::from_value(settings).map_err(LoadConfigError::Deserialization)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Json,
    Yaml,
    Toml,
}

fn parse_file(format: FileFormat, contents: &str) -> Result<Value, FileFormatError> {
    let value = match format {
        FileFormat::Json => serde_json::from_str(contents)?,
        FileFormat::Yaml => serde_yaml::from_str(contents)?,
        FileFormat::Toml => toml::from_str(contents)?,
    };

    Ok(value)
}

/// Deep-merges environment overrides into the file settings.
fn merge_overrides(settings: &mut Value, overrides: Value) {
    let (Value::Object(settings), Value::Object(overrides)) = (settings, overrides) else {
        return;
    };

    for (key, value) in overrides {
        let existing = settings
            .keys()
            .find(|candidate| **candidate != key && snake_case(candidate) == key)
            .cloned();
        if let Some(previous) = existing.and_then(|existing| settings.remove(&existing)) {
            settings.insert(key.clone(), previous);
        }

        let nested = value.is_object() && matches!(settings.get(&key), Some(Value::Object(_)));
        match settings.get_mut(&key) {
            Some(target) if nested => merge_overrides(target, value),
            Some(target) => *target = value,
            None => {
                settings.insert(key, value);
            }
        }
    }
}

fn snake_case(key: &str) -> String {
    let mut snake = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            if !snake.is_empty() {
                snake.push('_');
            }
            snake.push(c.to_ascii_lowercase());
        } else {
            snake.push(c);
        }
    }

    snake
}

fn environment_source<T: Config>() -> config::Environment {
    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    if !T::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source.list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    environment_source
}

fn check_configuration_file(path: &Path) -> Result<FileFormat, LoadConfigError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(LoadConfigError::MissingConfigurationFile(
                path.to_path_buf(),
            ));
        }
        Err(source) => {
            return Err(LoadConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if !metadata.is_file() {
        return Err(LoadConfigError::MissingConfigurationFile(
            path.to_path_buf(),
        ));
    }

    let format = path
        .extension()
        .and_then(|extension| extension.to_str())
        .and_then(|extension| match extension.to_ascii_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "yaml" | "yml" => Some(FileFormat::Yaml),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        });

    format.ok_or_else(|| LoadConfigError::UnsupportedExtension {
        path: path.to_path_buf(),
        expected: CONFIG_FILE_EXTENSIONS.join(", "),
    })
}
