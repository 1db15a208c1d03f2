//! Typed-parameter errors. A parameter failure fails the whole
//! parse/convert step; no partial substitution is ever returned.

use super::error_code::{self, SluiceErrorCode};

#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("malformed parameter JSON: {message}")]
    Malformed { message: String },

    #[error("parameter payload root must be a JSON object")]
    RootNotObject,

    #[error("parameter '{name}' does not match declared type {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("SQL template references parameter ':{name}' which was not supplied")]
    MissingParameter { name: String },
}

impl SluiceErrorCode for ParamError {
    fn error_code(&self) -> &'static str {
        error_code::PARAM_INVALID
    }
}
