use thiserror::Error;

/// Errors raised while assembling a plugin framework.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("unknown scheduling plugin: {0}")]
    UnknownPlugin(String),

    #[error("plugin framework has no filter plugin")]
    NoFilter,
}
