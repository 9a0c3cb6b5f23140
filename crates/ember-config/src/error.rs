//! Configuration error types.

/// Failure while loading or persisting the server's `config.ron`.
///
/// Startup treats these as non-fatal: the binary logs the error and runs
/// with defaults rather than refusing to boot over a bad settings file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `config.ron` exists but could not be read.
    #[error("cannot read config.ron: {0}")]
    ReadError(#[source] std::io::Error),

    /// The config directory or `config.ron` could not be written.
    #[error("cannot write config.ron: {0}")]
    WriteError(#[source] std::io::Error),

    /// `config.ron` is not valid RON for the server's settings schema.
    #[error("config.ron is malformed: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    /// The settings could not be rendered to RON text.
    #[error("cannot serialize settings to RON: {0}")]
    SerializeError(#[source] ron::Error),
}
