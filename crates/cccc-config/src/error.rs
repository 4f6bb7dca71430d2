use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(cccc::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid value for `{key}`: {message}")]
    #[diagnostic(code(cccc::config::invalid_value))]
    InvalidValue {
        key: String,
        message: String,
        #[source_code]
        src: String,
        #[label("{message}")]
        span: miette::SourceSpan,
    },

    #[error("Missing required field: {field}")]
    #[diagnostic(
        code(cccc::config::missing_field),
        help("endpoint \"tcp\" needs port=<1-65535>; endpoint \"unix\" needs path=\"...\"")
    )]
    MissingField { field: String },

    #[error("Failed to read config file {path}")]
    #[diagnostic(code(cccc::config::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
