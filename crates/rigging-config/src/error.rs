use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "No settings file found. Looked for:\n\
        - current directory: rigging.local.yaml, .rigging.local.yaml, rigging.yaml, .rigging.yaml\n\
        - the same names under ./.rigging/\n\
        - ~/.config/rigging/config.yaml\n\
        A path can also be given with the RIGGING_CONFIG environment variable"
    )]
    ConfigFileNotFound,

    #[error("Invalid settings in {path}: {message}")]
    Invalid { path: String, message: String },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
