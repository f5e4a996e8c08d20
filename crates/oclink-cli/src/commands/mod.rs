//! CLI command implementations.

pub mod info;
pub mod preprocess;
pub mod status;

use crate::error::{CliError, CliResult};

/// Parse `NAME=VALUE` constant definitions.
pub fn parse_defines(defines: &[String]) -> CliResult<Vec<(String, String)>> {
    defines
        .iter()
        .map(|define| match define.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.to_string()))
            }
            _ => Err(CliError::InvalidDefine(define.clone())),
        })
        .collect()
}
