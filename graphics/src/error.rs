//! Graphics error types.
//!
//! Two failure classes exist in this crate:
//!
//! - Conditions the caller can act on (staging overflow, a full sub-allocated
//!   buffer, a full bindless table, bad arguments). These are returned as
//!   [`GraphicsError`].
//! - Native Vulkan failures. The device is unusable at that point, so
//!   [`vk_check!`](crate::vk_check) logs the result code with the call site and
//!   aborts the process.

use ash::vk;
use thiserror::Error;

/// Errors that can be returned to callers of the graphics core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// The core could not be brought up (no loader, no device, missing features).
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// The current frame's staging buffer cannot hold the upload.
    #[error("staging buffer exhausted: requested {requested} bytes, {remaining} remaining this frame")]
    StagingExhausted { requested: u64, remaining: u64 },

    /// No free range of sufficient size in a sub-allocated buffer.
    #[error("sub-allocated buffer exhausted: requested {requested} bytes, largest free range {largest_free}")]
    SubAllocationExhausted { requested: u64, largest_free: u64 },

    /// Every slot of the bindless texture table is in use.
    #[error("bindless texture table full ({capacity} slots)")]
    BindlessTableFull { capacity: u32 },

    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result alias used throughout the crate.
pub type GraphicsResult<T> = Result<T, GraphicsError>;

/// Log a failed Vulkan call and abort the process.
///
/// Called by [`vk_check!`](crate::vk_check); not meant to be used directly.
#[cold]
#[inline(never)]
pub fn fatal_vk_error(result: vk::Result, file: &str, line: u32) -> ! {
    log::error!("Vulkan call failed: {result:?} ({file}:{line})");
    std::process::abort()
}

/// Unwrap a `VkResult`, aborting the process on failure.
///
/// ```ignore
/// let fence = vk_check!(unsafe { device.create_fence(&info, None) });
/// ```
#[macro_export]
macro_rules! vk_check {
    ($call:expr) => {
        match $call {
            Ok(value) => value,
            Err(result) => $crate::error::fatal_vk_error(result, file!(), line!()),
        }
    };
}
