//! # oclink
//!
//! Host and device variable synchronization and kernel dispatch groups for
//! OpenCL-style compute APIs.
//!
//! Host values are wrapped in device variables that track whether the
//! device copy is current. A dispatch group uploads changed arguments, binds
//! them to a compiled kernel, launches it and downloads results after the
//! queue drains. Ring buffers upload only the range written since the last
//! upload, split in two when it wraps.
//!
//! ## Quick Start
//!
//! ```ignore
//! use oclink::prelude::*;
//!
//! let runtime = Oclink::builder().backend(Backend::Cpu).build()?;
//!
//! let data = runtime.buffer::<f32>("data", 1024);
//! let factor = DeviceValue::new("factor", 2.0f32).with_scope(ArgScope::Private);
//!
//! let kernel = runtime
//!     .kernel("scale")?
//!     .with_argument(&data)
//!     .with_argument(&factor)
//!     .with_global(NdRange::d1(1024));
//!
//! let mut group = runtime.dispatch(kernel)?;
//! group.run(&[], None)?;
//! group.wait_for_group()?;
//! group.download_result(&data)?;
//! ```
//!
//! ## Backends
//!
//! - **CPU** - host simulation, always available
//! - **OpenCL** - requires the `opencl` feature and an installed ICD
//!
//! `Backend::Auto` picks OpenCL when a device is present and falls back to
//! the host simulator otherwise.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(hidden_glob_reexports)]

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

pub use oclink_core::*;
pub use oclink_cpu::HostContext;
pub use oclink_opencl::OpenClContext;

use oclink_core::config::OclinkConfig;
use oclink_core::device::DeviceInfo;
use oclink_core::memory::DeviceContext;
use oclink_core::source::{KernelSource, KernelSourceLoader};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{Backend, Oclink, OclinkBuilder};
    pub use oclink_core::prelude::*;
    pub use oclink_cpu::HostContext;
}

/// Device backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Backend {
    /// OpenCL when available, host simulation otherwise.
    #[default]
    Auto,
    /// Host simulation.
    Cpu,
    /// OpenCL.
    OpenCl,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::OpenCl => write!(f, "opencl"),
        }
    }
}

impl FromStr for Backend {
    type Err = OclinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" | "host" => Ok(Self::Cpu),
            "opencl" | "ocl" => Ok(Self::OpenCl),
            other => Err(OclinkError::config(format!("unknown backend `{other}`"))),
        }
    }
}

/// A device context together with the settings used to load kernels and
/// create variables.
pub struct Oclink {
    backend: Backend,
    context: Arc<dyn DeviceContext>,
    config: OclinkConfig,
    loader: KernelSourceLoader,
}

impl Oclink {
    /// Create a new builder.
    pub fn builder() -> OclinkBuilder {
        OclinkBuilder::new()
    }

    /// Create with default settings and auto-selected backend.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Wrap an existing context, e.g. a [`HostContext`] with registered kernels.
    pub fn with_context(
        backend: Backend,
        context: Arc<dyn DeviceContext>,
        config: OclinkConfig,
    ) -> Self {
        let loader = KernelSourceLoader::from_config(&config);
        Self {
            backend,
            context,
            config,
            loader,
        }
    }

    /// The backend in use.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// The device context.
    pub fn context(&self) -> &Arc<dyn DeviceContext> {
        &self.context
    }

    /// Active configuration.
    pub fn config(&self) -> &OclinkConfig {
        &self.config
    }

    /// Device capabilities.
    pub fn device_info(&self) -> DeviceInfo {
        self.context.device_info()
    }

    /// Loader for kernel sources under the configured root.
    pub fn source_loader(&self) -> &KernelSourceLoader {
        &self.loader
    }

    /// Load `<root>/<name>.<ext>` and compile its default entry point.
    pub fn kernel<'a>(&self, name: &str) -> Result<KernelDescriptor<'a>> {
        self.compile(self.loader.load_default(name)?)
    }

    /// Load a kernel, substitute `constants` and compile `entry_point`.
    pub fn kernel_with_constants<'a, K: AsRef<str>, V: AsRef<str>>(
        &self,
        name: &str,
        entry_point: &str,
        constants: &[(K, V)],
    ) -> Result<KernelDescriptor<'a>> {
        self.compile(self.loader.load_with_constants(name, entry_point, constants)?)
    }

    /// Compile inline source text.
    pub fn kernel_from_source<'a>(&self, source: &str, entry_point: &str) -> Result<KernelDescriptor<'a>> {
        self.compile(KernelSource::from_text(source, entry_point))
    }

    fn compile<'a>(&self, source: KernelSource) -> Result<KernelDescriptor<'a>> {
        source.into_descriptor().compiled_for(Arc::clone(&self.context))
    }

    /// Create a dispatch group configured from the runtime settings.
    pub fn dispatch<'a>(&self, kernel: KernelDescriptor<'a>) -> Result<DispatchGroup<'a>> {
        Ok(DispatchGroup::new(kernel)?
            .block_variables(self.config.block_variables)
            .sync_upload(self.config.sync_upload))
    }

    /// A zeroed buffer using the configured transfer mode.
    pub fn buffer<T: Pod + Default + Send + Sync>(&self, name: &str, len: usize) -> TypedBuffer<T> {
        TypedBuffer::new(name, len).with_blocking(self.config.blocking_transfers)
    }

    /// A ring buffer using the configured transfer mode.
    pub fn ring<T: Pod + Default + Send + Sync>(&self, name: &str, capacity: usize) -> Result<RingBuffer<T>> {
        Ok(RingBuffer::new(name, capacity)?.with_blocking(self.config.blocking_transfers))
    }
}

impl fmt::Debug for Oclink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Oclink")
            .field("backend", &self.backend)
            .field("device", &self.context.device_info().name)
            .finish()
    }
}

/// Builder for [`Oclink`].
#[derive(Debug, Clone, Default)]
pub struct OclinkBuilder {
    backend: Option<Backend>,
    device: Option<usize>,
    config: Option<OclinkConfig>,
}

impl OclinkBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend, overriding the configuration.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the device index, overriding the configuration.
    pub fn device(mut self, index: usize) -> Self {
        self.device = Some(index);
        self
    }

    /// Use `config` instead of the environment.
    pub fn config(mut self, config: OclinkConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load the configuration from a TOML file overlaid with the environment.
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.config = Some(OclinkConfig::load(path)?);
        Ok(self)
    }

    /// Build the runtime.
    pub fn build(self) -> Result<Oclink> {
        let mut config = match self.config {
            Some(config) => config,
            None => OclinkConfig::from_env()?,
        };
        if let Some(device) = self.device {
            config.device_index = device;
        }
        let backend = match self.backend {
            Some(backend) => backend,
            None => config.backend.parse()?,
        };
        config.validate().map_err(OclinkError::InvalidConfig)?;

        let (backend, context): (Backend, Arc<dyn DeviceContext>) = match backend {
            Backend::Auto => Self::build_auto(config.device_index)?,
            Backend::Cpu => (Backend::Cpu, Arc::new(HostContext::new())),
            Backend::OpenCl => (
                Backend::OpenCl,
                Arc::new(OpenClContext::new(config.device_index)?),
            ),
        };

        tracing::info!(%backend, device = %context.device_info().name, "oclink runtime ready");
        let loader = KernelSourceLoader::from_config(&config);
        Ok(Oclink {
            backend,
            context,
            config,
            loader,
        })
    }

    fn build_auto(device_index: usize) -> Result<(Backend, Arc<dyn DeviceContext>)> {
        if oclink_opencl::is_opencl_available() {
            match OpenClContext::new(device_index) {
                Ok(context) => {
                    tracing::info!("Auto-selected OpenCL backend");
                    return Ok((Backend::OpenCl, Arc::new(context)));
                }
                Err(err) => tracing::warn!(error = %err, "OpenCL device unusable, falling back"),
            }
        }

        tracing::info!("Auto-selected CPU backend (no OpenCL device available)");
        Ok((Backend::Cpu, Arc::new(HostContext::new())))
    }
}

/// Check availability of backends at runtime.
pub mod availability {
    use super::Backend;

    /// Check if OpenCL is available.
    pub fn opencl() -> bool {
        oclink_opencl::is_opencl_available()
    }

    /// Get list of available backends.
    pub fn available_backends() -> Vec<Backend> {
        let mut backends = vec![Backend::Cpu];
        if opencl() {
            backends.push(Backend::OpenCl);
        }
        backends
    }
}
