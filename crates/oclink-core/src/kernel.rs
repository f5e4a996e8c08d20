//! Kernel descriptors: source, entry point, arguments and launch size.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{OclinkError, Result};
use crate::geometry::NdRange;
use crate::memory::{CompiledKernel, DeviceContext};
use crate::variable::DeviceVariable;

/// Entry point used when none is given.
pub const DEFAULT_ENTRY_POINT: &str = "main_kernel";

/// Shared compiled kernel. Argument binding needs exclusive access.
pub type SharedKernel = Arc<Mutex<Box<dyn CompiledKernel>>>;

/// A kernel with its ordered argument list and launch size.
///
/// Arguments are borrowed; every variable must outlive the descriptor.
/// Descriptors compare equal only when both carry the same non-zero id.
#[derive(Clone)]
pub struct KernelDescriptor<'a> {
    id: u64,
    entry_point: String,
    source: String,
    arguments: Vec<&'a dyn DeviceVariable>,
    global: NdRange,
    local: NdRange,
    context: Option<Arc<dyn DeviceContext>>,
    compiled: Option<SharedKernel>,
}

impl<'a> KernelDescriptor<'a> {
    /// Create a descriptor for `source` with entry point `main_kernel`,
    /// a global size of 1 and an automatic local size.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: 0,
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            source: source.into(),
            arguments: Vec::new(),
            global: NdRange::d1(1),
            local: NdRange::empty(),
            context: None,
            compiled: None,
        }
    }

    /// Set the identity token.
    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    /// Set the entry point.
    #[must_use]
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    /// Append an argument.
    #[must_use]
    pub fn with_argument(mut self, variable: &'a dyn DeviceVariable) -> Self {
        self.arguments.push(variable);
        self
    }

    /// Replace the argument list.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Vec<&'a dyn DeviceVariable>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Set the global size.
    #[must_use]
    pub fn with_global(mut self, global: NdRange) -> Self {
        self.global = global;
        self
    }

    /// Set the local size. An empty range selects one automatically.
    #[must_use]
    pub fn with_local(mut self, local: NdRange) -> Self {
        self.local = local;
        self
    }

    /// Identity token, 0 when unset.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Entry point name.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Kernel source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Ordered argument list.
    pub fn arguments(&self) -> &[&'a dyn DeviceVariable] {
        &self.arguments
    }

    /// Argument `index`.
    pub fn argument(&self, index: usize) -> Option<&'a dyn DeviceVariable> {
        self.arguments.get(index).copied()
    }

    /// Replace argument `index`.
    pub fn set_argument(&mut self, index: usize, variable: &'a dyn DeviceVariable) -> Result<()> {
        let len = self.arguments.len();
        let slot = self.arguments.get_mut(index).ok_or_else(|| {
            OclinkError::precondition(format!("argument {index} out of range for {len} arguments"))
        })?;
        *slot = variable;
        Ok(())
    }

    /// Global size.
    pub fn global(&self) -> NdRange {
        self.global
    }

    /// Set the global size.
    pub fn set_global(&mut self, global: NdRange) {
        self.global = global;
    }

    /// Local size, empty when automatic.
    pub fn local(&self) -> NdRange {
        self.local
    }

    /// Set the local size.
    pub fn set_local(&mut self, local: NdRange) {
        self.local = local;
    }

    /// Context the kernel was compiled for.
    pub fn context(&self) -> Option<&Arc<dyn DeviceContext>> {
        self.context.as_ref()
    }

    /// Compiled kernel, once [`compile`](Self::compile) succeeded.
    pub fn compiled(&self) -> Option<&SharedKernel> {
        self.compiled.as_ref()
    }

    /// Whether the kernel has been compiled.
    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Compile the source for `context` and keep the resulting kernel.
    pub fn compile(&mut self, context: Arc<dyn DeviceContext>) -> Result<()> {
        tracing::info!(entry_point = %self.entry_point, "Compiling kernel");
        let kernel = context.build_kernel(&self.source, &self.entry_point)?;
        self.compiled = Some(Arc::new(Mutex::new(kernel)));
        self.context = Some(context);
        Ok(())
    }

    /// Builder form of [`compile`](Self::compile).
    pub fn compiled_for(mut self, context: Arc<dyn DeviceContext>) -> Result<Self> {
        self.compile(context)?;
        Ok(self)
    }
}

impl PartialEq for KernelDescriptor<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id > 0 && self.id == other.id
    }
}

impl fmt::Debug for KernelDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelDescriptor")
            .field("id", &self.id)
            .field("entry_point", &self.entry_point)
            .field(
                "arguments",
                &self.arguments.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .field("global", &self.global)
            .field("local", &self.local)
            .field("compiled", &self.is_compiled())
            .finish()
    }
}
