//! Macro for generating unavailable backend stubs.
//!
//! When a backend feature (e.g. `opencl`) is disabled, the backend crate still
//! exposes its context type so downstream code compiles unchanged. The stub
//! refuses construction and reports `DEVICE_NOT_FOUND` from every operation.

/// Generate a stub device context for an unavailable backend.
///
/// # Example
///
/// ```ignore
/// oclink_core::unavailable_backend!(OpenClContext, "OpenCL");
/// ```
#[macro_export]
macro_rules! unavailable_backend {
    ($context:ident, $name:expr) => {
        /// Stub context when the backend feature is disabled.
        pub struct $context;

        impl $context {
            /// Creation fails when the backend is not available.
            pub fn new(_device_index: usize) -> $crate::error::Result<Self> {
                Err($crate::error::OclinkError::BackendUnavailable(
                    concat!($name, " feature not enabled").to_string(),
                ))
            }
        }

        impl $crate::memory::DeviceContext for $context {
            fn device_info(&self) -> $crate::device::DeviceInfo {
                $crate::device::DeviceInfo::default()
            }

            fn create_buffer(
                &self,
                _access: $crate::types::AccessMode,
                _size: usize,
            ) -> $crate::status::DeviceResult<
                ::std::sync::Arc<dyn $crate::memory::DeviceMemory>,
            > {
                Err($crate::status::Status::DEVICE_NOT_FOUND)
            }

            fn create_queue(
                &self,
            ) -> $crate::status::DeviceResult<Box<dyn $crate::memory::CommandQueue>> {
                Err($crate::status::Status::DEVICE_NOT_FOUND)
            }

            fn build_kernel(
                &self,
                _source: &str,
                _entry_point: &str,
            ) -> $crate::error::Result<Box<dyn $crate::memory::CompiledKernel>> {
                Err($crate::error::OclinkError::BackendUnavailable(
                    $name.to_string(),
                ))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::memory::DeviceContext;
    use crate::status::Status;
    use crate::types::AccessMode;

    crate::unavailable_backend!(MissingContext, "Missing");

    #[test]
    fn test_stub_refuses_everything() {
        assert!(MissingContext::new(0).is_err());
        let ctx = MissingContext;
        assert_eq!(ctx.device_info().name, "None");
        assert_eq!(
            ctx.create_buffer(AccessMode::ReadWrite, 4).err(),
            Some(Status::DEVICE_NOT_FOUND)
        );
        assert!(ctx.build_kernel("", "main_kernel").is_err());
    }
}
