//! Configuration error types

use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_includes_reason() {
        let err = Error::Config("page_size must be greater than 0".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: page_size must be greater than 0"
        );
    }

    #[test]
    fn io_error_converts_via_from() {
        let err: Error =
            std::io::Error::new(std::io::ErrorKind::NotFound, "api_keys_file missing").into();
        assert!(err.to_string().starts_with("I/O error:"), "got: {err}");
    }

    #[test]
    fn toml_error_converts_via_from() {
        let parse: std::result::Result<toml::Table, _> = toml::from_str("not = [valid");
        let err: Error = parse.unwrap_err().into();
        assert!(err.to_string().starts_with("TOML parse error:"), "got: {err}");
    }
}
