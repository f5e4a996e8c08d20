//! `oclink status` command - Explain a device status code.

use colored::Colorize;
use oclink::status::Status;

use crate::error::CliResult;

/// Execute the `status` command.
pub fn execute(code: i32) -> CliResult<()> {
    let status = Status(code);
    let message = if status.is_success() {
        "success".to_string()
    } else {
        status.message()
    };

    println!("{} {}", code.to_string().bright_white(), message);
    if status.is_fatal() {
        println!(
            "  {} fatal: the queue or context cannot be used any more",
            "•".dimmed()
        );
    }
    Ok(())
}
