//! Driver error type and its errno mapping.

use thiserror::Error;

/// Positive errno values reported by [`DriverError::errno`].
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EINTR: i32 = 4;
    pub const EIO: i32 = 5;
    pub const ENOMEM: i32 = 12;
    pub const EFAULT: i32 = 14;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("buffer size must be nonzero")]
    InvalidSize,

    #[error("job address {va:#x} and size {size:#x} must both be 4-byte aligned")]
    Misaligned { va: u32, size: u32 },

    #[error("invalid device configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("no free device address range of {pages} pages")]
    NoVaSpace { pages: u32 },

    #[error("out of DMA memory")]
    OutOfMemory,

    #[error("all {max} device slots are in use")]
    NoDeviceSlot { max: usize },

    #[error("buffer was created by a different device")]
    DeviceMismatch,

    #[error("no mapping starts at {va:#x}")]
    NotMapped { va: u32 },

    #[error("no device attached at index {0}")]
    NoSuchDevice(usize),

    #[error("access of {len:#x} bytes at {offset:#x} is outside the {size:#x}-byte buffer")]
    OutOfRange { offset: u64, len: usize, size: u64 },

    #[error("a job of this client faulted on the device")]
    Io,

    #[error("device has been detached")]
    DeviceGone,

    #[error("wait interrupted")]
    Cancelled,
}

/// Coarse failure class, independent of the specific variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    ResourceExhaustion,
    Permission,
    NotFound,
    DeviceFault,
    Cancelled,
}

impl DriverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSize
            | Self::Misaligned { .. }
            | Self::InvalidConfig(_)
            | Self::OutOfRange { .. } => ErrorKind::Validation,
            Self::NoVaSpace { .. } | Self::OutOfMemory | Self::NoDeviceSlot { .. } => {
                ErrorKind::ResourceExhaustion
            }
            Self::DeviceMismatch => ErrorKind::Permission,
            Self::NotMapped { .. } | Self::NoSuchDevice(_) => ErrorKind::NotFound,
            Self::Io | Self::DeviceGone => ErrorKind::DeviceFault,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidSize | Self::Misaligned { .. } | Self::InvalidConfig(_) => errno::EINVAL,
            Self::NoVaSpace { .. } | Self::OutOfMemory => errno::ENOMEM,
            Self::NoDeviceSlot { .. } => errno::ENOSPC,
            Self::DeviceMismatch => errno::EPERM,
            Self::NotMapped { .. } => errno::ENOENT,
            Self::NoSuchDevice(_) | Self::DeviceGone => errno::ENODEV,
            Self::OutOfRange { .. } => errno::EFAULT,
            Self::Io => errno::EIO,
            Self::Cancelled => errno::EINTR,
        }
    }
}

impl From<udoom_abi::DmaError> for DriverError {
    fn from(err: udoom_abi::DmaError) -> Self {
        match err {
            udoom_abi::DmaError::OutOfMemory => Self::OutOfMemory,
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_follows_kind() {
        assert_eq!(DriverError::InvalidSize.errno(), errno::EINVAL);
        assert_eq!(DriverError::Misaligned { va: 0, size: 13 }.errno(), errno::EINVAL);
        assert_eq!(DriverError::NoVaSpace { pages: 1 }.errno(), errno::ENOMEM);
        assert_eq!(DriverError::DeviceMismatch.errno(), errno::EPERM);
        assert_eq!(DriverError::NotMapped { va: 0x1000 }.errno(), errno::ENOENT);
        assert_eq!(DriverError::Io.errno(), errno::EIO);
        assert_eq!(DriverError::Cancelled.errno(), errno::EINTR);
        assert_eq!(DriverError::NoDeviceSlot { max: 256 }.errno(), errno::ENOSPC);

        assert_eq!(DriverError::OutOfMemory.kind(), ErrorKind::ResourceExhaustion);
        assert_eq!(DriverError::DeviceGone.kind(), ErrorKind::DeviceFault);
    }

    #[test]
    fn dma_exhaustion_maps_to_out_of_memory() {
        let err: DriverError = udoom_abi::DmaError::OutOfMemory.into();
        assert_eq!(err, DriverError::OutOfMemory);
        assert_eq!(err.to_string(), "out of DMA memory");
    }
}
