//! `oclink preprocess` command - Expand includes and constants in a kernel source.

use std::fs;
use std::path::Path;

use colored::Colorize;
use oclink::config::OclinkConfig;
use oclink::source::KernelSourceLoader;

use crate::error::CliResult;

use super::parse_defines;

/// Execute the `preprocess` command.
pub fn execute(
    config: &OclinkConfig,
    name: &str,
    root: Option<&str>,
    defines: &[String],
    output: Option<&str>,
) -> CliResult<()> {
    let constants = parse_defines(defines)?;
    let text = preprocess(config, name, root, &constants)?;

    match output {
        Some(path) => {
            fs::write(path, &text)?;
            println!(
                "{} Wrote {} ({} bytes)",
                "✓".bright_green(),
                path.bright_white(),
                text.len()
            );
        }
        None => print!("{}", text),
    }
    Ok(())
}

/// Load `name` and apply `constants`, returning the final source text.
pub fn preprocess(
    config: &OclinkConfig,
    name: &str,
    root: Option<&str>,
    constants: &[(String, String)],
) -> CliResult<String> {
    let loader = match root {
        Some(root) => KernelSourceLoader::from_config(&OclinkConfig {
            kernel_root: Path::new(root).to_path_buf(),
            ..config.clone()
        }),
        None => KernelSourceLoader::from_config(config),
    };

    tracing::debug!(path = %loader.source_path(name).display(), "Preprocessing kernel");
    let source = loader.load_default(name)?.with_constants(constants);
    Ok(source.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_preprocess_expands_includes_and_defines() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("include")).unwrap();
        fs::write(dir.path().join("include/size.h"), "#define N %N%").unwrap();
        fs::write(dir.path().join("k.cl"), "#include \"size.h\"\nkernel body").unwrap();

        let text = preprocess(
            &OclinkConfig::default(),
            "k",
            dir.path().to_str(),
            &[("N".to_string(), "16".to_string())],
        )
        .unwrap();
        assert!(text.contains("#define N 16"));
        assert!(text.contains("kernel body"));
    }

    #[test]
    fn test_preprocess_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(preprocess(&OclinkConfig::default(), "nope", dir.path().to_str(), &[]).is_err());
    }
}
