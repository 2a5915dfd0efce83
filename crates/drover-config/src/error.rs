use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenError {
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    #[error("missing generation input: {0}")]
    MissingInput(&'static str),

    #[error("secret bundle is corrupt: {0}")]
    SecretsCorrupt(String),

    #[error("invalid config patch: {0}")]
    InvalidPatch(serde_yaml::Error),

    #[error("config render failed: {0}")]
    Render(serde_yaml::Error),

    #[error("compression failed: {0}")]
    Compression(std::io::Error),
}
