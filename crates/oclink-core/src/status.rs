//! Device status codes and their human-readable messages.

use std::fmt;

/// Status code returned by a device operation.
///
/// Numbering follows the OpenCL status codes so real backends can pass their
/// native codes through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    /// Operation completed.
    pub const SUCCESS: Status = Status(0);
    /// No device matched the request.
    pub const DEVICE_NOT_FOUND: Status = Status(-1);
    /// Device ran out of resources.
    pub const OUT_OF_RESOURCES: Status = Status(-5);
    /// Host allocation failed.
    pub const OUT_OF_HOST_MEMORY: Status = Status(-6);
    /// Image format unsupported.
    pub const IMAGE_FORMAT_NOT_SUPPORTED: Status = Status(-10);
    /// Invalid argument value.
    pub const INVALID_VALUE: Status = Status(-30);
    /// Invalid device.
    pub const INVALID_DEVICE: Status = Status(-33);
    /// Invalid context.
    pub const INVALID_CONTEXT: Status = Status(-34);
    /// Queue properties not supported.
    pub const INVALID_QUEUE_PROPERTIES: Status = Status(-35);
    /// Command queue is broken.
    pub const INVALID_COMMAND_QUEUE: Status = Status(-36);
    /// Host pointer is invalid.
    pub const INVALID_HOST_PTR: Status = Status(-37);
    /// Memory object is invalid.
    pub const INVALID_MEM_OBJECT: Status = Status(-38);
    /// Image format descriptor rejected.
    pub const INVALID_IMAGE_FORMAT_DESCRIPTOR: Status = Status(-39);
    /// Kernel object is invalid.
    pub const INVALID_KERNEL: Status = Status(-48);
    /// Kernel argument value rejected.
    pub const INVALID_ARG_VALUE: Status = Status(-50);
    /// One or more kernel arguments unset or invalid.
    pub const INVALID_KERNEL_ARGS: Status = Status(-52);
    /// Work-group size does not divide the global size or exceeds the device limit.
    pub const INVALID_WORK_GROUP_SIZE: Status = Status(-54);

    /// Raw status code.
    pub fn code(self) -> i32 {
        self.0
    }

    /// Whether this status reports success.
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Whether this status marks a broken execution context.
    ///
    /// Once a queue or context is broken, no further operation on it can
    /// succeed, so these are always escalated instead of logged.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::INVALID_COMMAND_QUEUE | Self::INVALID_CONTEXT)
    }

    /// Convert a raw status into a `Result`.
    pub fn check(self) -> Result<(), Status> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Human-readable message for this status.
    pub fn message(self) -> String {
        let known = match self {
            Self::INVALID_CONTEXT => "Invalid context",
            Self::DEVICE_NOT_FOUND => "Could not find any device!",
            Self::INVALID_DEVICE => "Invalid device",
            Self::INVALID_VALUE => "Invalid value",
            Self::INVALID_QUEUE_PROPERTIES => "properties are not supported by device",
            Self::INVALID_COMMAND_QUEUE => "the command queue is broken",
            Self::OUT_OF_HOST_MEMORY => "out of host memory",
            Self::SUCCESS => "",
            Self::INVALID_HOST_PTR => "Host pointer is invalid",
            Self::IMAGE_FORMAT_NOT_SUPPORTED => "The Image format is not supported!",
            Self::INVALID_KERNEL_ARGS => "One ore more kernel arguments are invalid!",
            Self::INVALID_MEM_OBJECT => "CL memory object is invalid!",
            Self::OUT_OF_RESOURCES => "CL out of ressources! Check memory or work items count.",
            Self::INVALID_KERNEL => "Try to access on undefined kernel!",
            Self::INVALID_WORK_GROUP_SIZE => {
                "Workgroup size and size of kernelthreads is not divideable or the max workgroup size exceeded!"
            }
            Self::INVALID_ARG_VALUE => "Argument was invalid on OpenCL Device!",
            Self::INVALID_IMAGE_FORMAT_DESCRIPTOR => {
                "Requested Imageformat is not supported by this device!"
            }
            _ => return format!("Unknown Error [{}]", self.0),
        };
        known.to_string()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.0)
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status(code)
    }
}

/// Result of a raw device operation.
pub type DeviceResult<T = ()> = std::result::Result<T, Status>;
