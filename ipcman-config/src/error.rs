use ipcman_model::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("device {0} is configured more than once")]
    DuplicateDevice(i64),

    #[error("device {id}: {source}")]
    Device {
        id: i64,
        #[source]
        source: ModelError,
    },
}
