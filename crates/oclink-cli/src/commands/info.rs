//! `oclink info` command - Show the selected device.

use colored::Colorize;
use oclink::config::OclinkConfig;
use oclink::{availability, Backend, Oclink};

use crate::error::{CliError, CliResult};

/// Execute the `info` command.
pub fn execute(config: OclinkConfig, backend: Option<&str>) -> CliResult<()> {
    let mut builder = Oclink::builder().config(config);
    if let Some(backend) = backend {
        let backend: Backend = backend
            .parse()
            .map_err(|_| CliError::InvalidBackend(backend.to_string()))?;
        builder = builder.backend(backend);
    }
    let runtime = builder.build()?;
    let info = runtime.device_info();

    println!("{}:", "Device".bright_white().underline());
    println!("  {} Backend: {}", "•".dimmed(), runtime.backend().to_string().bright_yellow());
    println!("  {} Name: {}", "•".dimmed(), info.name.bright_white());
    println!("  {} Vendor: {}", "•".dimmed(), info.vendor);
    println!("  {} Version: {}", "•".dimmed(), info.version);
    println!("  {} Compute units: {}", "•".dimmed(), info.max_compute_units);
    println!("  {} Max work-group size: {}", "•".dimmed(), info.max_work_group_size);
    println!(
        "  {} Max work-items: {:?}",
        "•".dimmed(),
        info.max_work_items_per_dimension
    );
    println!(
        "  {} Global memory: {} MiB",
        "•".dimmed(),
        info.max_global_memory >> 20
    );
    println!("  {} Local memory: {} KiB", "•".dimmed(), info.max_local_memory >> 10);
    println!("  {} Max allocation: {} MiB", "•".dimmed(), info.max_alloc_size >> 20);
    println!(
        "  {} Images: {}",
        "•".dimmed(),
        if info.image_support {
            format!("{}x{}", info.max_image2d_size[0], info.max_image2d_size[1])
        } else {
            "unsupported".to_string()
        }
    );

    let available: Vec<String> = availability::available_backends()
        .iter()
        .map(ToString::to_string)
        .collect();
    println!();
    println!("  {} Available backends: {}", "•".dimmed(), available.join(", "));
    Ok(())
}
