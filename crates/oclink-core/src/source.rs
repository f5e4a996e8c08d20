//! Kernel source loading and preprocessing.
//!
//! Sources live under a root directory as `<name>.<ext>`. Two passes run
//! before compilation: `#include "path"` directives are replaced by the
//! file contents, and `%NAME%` tokens are replaced by caller constants.
//! Includes resolve against the root first and the include directory second.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::OclinkConfig;
use crate::error::{OclinkError, Result};
use crate::kernel::{KernelDescriptor, DEFAULT_ENTRY_POINT};

/// Preprocessed kernel source and its entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    /// Entry point name.
    pub entry_point: String,
    /// Source text.
    pub text: String,
}

impl KernelSource {
    /// Source already held in memory, such as one embedded with `include_str!`.
    pub fn from_text(text: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            text: text.into(),
        }
    }

    /// Replace `%NAME%` tokens.
    #[must_use]
    pub fn with_constants<K: AsRef<str>, V: AsRef<str>>(mut self, constants: &[(K, V)]) -> Self {
        self.text = apply_constants(&self.text, constants);
        self
    }

    /// Turn into a kernel descriptor.
    pub fn into_descriptor<'a>(self) -> KernelDescriptor<'a> {
        KernelDescriptor::new(self.text).with_entry_point(self.entry_point)
    }
}

/// Replace every `%NAME%` token in `source` with its value.
pub fn apply_constants<K: AsRef<str>, V: AsRef<str>>(source: &str, constants: &[(K, V)]) -> String {
    let mut out = source.to_string();
    for (name, value) in constants {
        out = out.replace(&format!("%{}%", name.as_ref()), value.as_ref());
    }
    out
}

/// A parsed `#include "path"` directive.
struct IncludeDirective {
    start: usize,
    end: usize,
    path: String,
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '/' | '\\' | '.')
}

/// Find the first quoted include directive at or after `from`.
fn find_include(source: &str, from: usize) -> Option<IncludeDirective> {
    let mut search = from;
    while let Some(pos) = source[search..].find("#include") {
        let start = search + pos;
        let rest = &source[start + "#include".len()..];
        let trimmed = rest.trim_start();
        if trimmed.starts_with('"') {
            let body = &trimmed[1..];
            let len = body.find(|c: char| !is_path_char(c)).unwrap_or(body.len());
            if len >= 2 && body[len..].starts_with('"') {
                let consumed = rest.len() - trimmed.len() + 1 + len + 1;
                return Some(IncludeDirective {
                    start,
                    end: start + "#include".len() + consumed,
                    path: body[..len].to_string(),
                });
            }
        }
        search = start + "#include".len();
    }
    None
}

/// Loads kernel sources from a directory tree.
#[derive(Debug, Clone)]
pub struct KernelSourceLoader {
    root: PathBuf,
    include_dir: PathBuf,
    extension: String,
    max_depth: usize,
}

impl KernelSourceLoader {
    /// Load sources from `root` with the default include directory and extension.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let defaults = OclinkConfig::default();
        Self {
            root: root.into(),
            include_dir: defaults.include_dir,
            extension: defaults.kernel_extension,
            max_depth: defaults.max_include_depth,
        }
    }

    /// Loader configured from `config`.
    pub fn from_config(config: &OclinkConfig) -> Self {
        Self {
            root: config.kernel_root.clone(),
            include_dir: config.include_dir.clone(),
            extension: config.kernel_extension.clone(),
            max_depth: config.max_include_depth,
        }
    }

    /// Set the maximum include nesting.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the source file for kernel `name`.
    pub fn source_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{}", self.extension))
    }

    /// Read `<root>/<name>.<ext>` and expand its includes.
    pub fn load(&self, name: &str, entry_point: &str) -> Result<KernelSource> {
        let path = self.source_path(name);
        tracing::debug!(path = %path.display(), "Loading kernel source");
        let text = fs::read_to_string(&path)?;
        let text = self.expand_includes(&text, 0)?;
        Ok(KernelSource::from_text(text, entry_point))
    }

    /// Load with the default entry point `main_kernel`.
    pub fn load_default(&self, name: &str) -> Result<KernelSource> {
        self.load(name, DEFAULT_ENTRY_POINT)
    }

    /// Load and replace `%NAME%` constants.
    pub fn load_with_constants<K: AsRef<str>, V: AsRef<str>>(
        &self,
        name: &str,
        entry_point: &str,
        constants: &[(K, V)],
    ) -> Result<KernelSource> {
        Ok(self.load(name, entry_point)?.with_constants(constants))
    }

    /// Expand every include directive in `source`.
    pub fn expand_includes(&self, source: &str, depth: usize) -> Result<String> {
        let mut out = String::with_capacity(source.len());
        let mut cursor = 0;
        while let Some(directive) = find_include(source, cursor) {
            if depth >= self.max_depth {
                return Err(OclinkError::IncludeCycle {
                    include: directive.path,
                    depth: self.max_depth,
                });
            }
            let resolved = self.resolve(&directive.path)?;
            let included = fs::read_to_string(&resolved)?;
            tracing::trace!(include = %directive.path, path = %resolved.display(), "Expanding include");

            out.push_str(&source[cursor..directive.start]);
            out.push_str(&self.expand_includes(&included, depth + 1)?);
            out.push('\n');
            cursor = directive.end;
        }
        out.push_str(&source[cursor..]);
        Ok(out)
    }

    /// Find an include under the root, then under the include directory.
    pub fn resolve(&self, include: &str) -> Result<PathBuf> {
        let candidates = [
            self.root.join(include),
            self.root.join(&self.include_dir).join(include),
        ];
        if let Some(found) = candidates.iter().find(|p| p.is_file()) {
            return Ok(found.clone());
        }
        tracing::warn!(include, "Could not find kernel include file");
        Err(OclinkError::IncludeNotFound {
            include: include.to_string(),
            searched: candidates.iter().map(|p| p.display().to_string()).collect(),
        })
    }
}

impl Default for KernelSourceLoader {
    fn default() -> Self {
        Self::from_config(&OclinkConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_apply_constants() {
        let src = "#define N %COUNT%\nfloat k = %SCALE% * %COUNT%;";
        let out = apply_constants(src, &[("COUNT", "64"), ("SCALE", "0.5f")]);
        assert_eq!(out, "#define N 64\nfloat k = 0.5f * 64;");
    }

    #[test]
    fn test_find_include_requires_quoted_path() {
        assert!(find_include("#include <stdio.h>", 0).is_none());
        assert!(find_include("#include \"a\"", 0).is_none());
        let d = find_include("x\n#include  \"lib/m.h\"\ny", 0).unwrap();
        assert_eq!(d.path, "lib/m.h");
        assert_eq!(&"x\n#include  \"lib/m.h\"\ny"[d.start..d.end], "#include  \"lib/m.h\"");
    }

    #[test]
    fn test_load_resolves_root_then_include_dir() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "add.cl", "#include \"common.h\"\n#include \"math.h\"\nkernel");
        write(dir.path(), "common.h", "COMMON");
        write(dir.path(), "include/math.h", "MATH");

        let source = KernelSourceLoader::new(dir.path()).load("add", "add").unwrap();
        assert_eq!(source.entry_point, "add");
        assert!(source.text.contains("COMMON"));
        assert!(source.text.contains("MATH"));
        assert!(!source.text.contains("#include"));
    }

    #[test]
    fn test_nested_includes() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "k.cl", "#include \"a.h\"");
        write(dir.path(), "a.h", "A\n#include \"b.h\"");
        write(dir.path(), "include/b.h", "B");
        let source = KernelSourceLoader::new(dir.path()).load_default("k").unwrap();
        assert!(source.text.contains('A'));
        assert!(source.text.contains('B'));
        assert_eq!(source.entry_point, "main_kernel");
    }

    #[test]
    fn test_missing_include_is_reported() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "k.cl", "#include \"nope.h\"");
        let err = KernelSourceLoader::new(dir.path()).load_default("k").unwrap_err();
        match err {
            OclinkError::IncludeNotFound { include, searched } => {
                assert_eq!(include, "nope.h");
                assert_eq!(searched.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_include_is_a_cycle() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "k.cl", "#include \"loop.h\"");
        write(dir.path(), "loop.h", "#include \"loop.h\"");
        let err = KernelSourceLoader::new(dir.path())
            .with_max_depth(4)
            .load_default("k")
            .unwrap_err();
        assert!(matches!(err, OclinkError::IncludeCycle { depth: 4, .. }));
    }

    #[test]
    fn test_missing_kernel_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = KernelSourceLoader::new(dir.path()).load_default("absent").unwrap_err();
        assert!(matches!(err, OclinkError::Io(_)));
    }

    #[test]
    fn test_load_with_constants() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "k.cl", "int n = %N%;");
        let source = KernelSourceLoader::new(dir.path())
            .load_with_constants("k", "main_kernel", &[("N", "3")])
            .unwrap();
        assert_eq!(source.text, "int n = 3;");
        let kernel = source.into_descriptor();
        assert_eq!(kernel.source(), "int n = 3;");
    }
}
