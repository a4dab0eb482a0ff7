//! Core configuration.
//!
//! ```ignore
//! let config = CoreConfig::new()
//!     .with_validation(true)
//!     .with_staging_buffer_size(32 * 1024 * 1024)
//!     .with_debug_receiver(Arc::new(MyConsole));
//! let core = Core::new(config)?;
//! ```

use std::ffi::CStr;
use std::fmt;
use std::sync::Arc;

/// Number of frame slots rotating round-robin.
pub const NUM_FRAMES_IN_FLIGHT: usize = 2;

/// Default per-frame staging buffer capacity in bytes.
pub const DEFAULT_STAGING_BUFFER_SIZE: u64 = 16_000_000;

static_assertions::const_assert!(NUM_FRAMES_IN_FLIGHT >= 2);

/// Severity of a message reported by the validation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DebugSeverity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl DebugSeverity {
    /// Log level a message of this severity is emitted at when no receiver is set.
    pub fn log_level(self) -> log::Level {
        match self {
            Self::Verbose => log::Level::Debug,
            Self::Info => log::Level::Info,
            Self::Warning => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

/// Receives every validation/diagnostic message the driver reports.
///
/// Implementations are called from driver threads.
pub trait DebugMessageReceiver: Send + Sync {
    fn debug_message(&self, severity: DebugSeverity, message: &str);
}

/// Descriptor counts for the shared descriptor pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSizes {
    pub max_sets: u32,
    pub combined_image_samplers: u32,
    pub storage_images: u32,
    pub storage_buffers: u32,
    pub uniform_buffers: u32,
}

impl Default for DescriptorPoolSizes {
    fn default() -> Self {
        Self {
            max_sets: 1000,
            combined_image_samplers: 5000,
            storage_images: 500,
            storage_buffers: 500,
            uniform_buffers: 500,
        }
    }
}

/// Parameters for [`Core::new`](crate::Core::new).
#[derive(Clone)]
pub struct CoreConfig {
    /// Enable the Khronos validation layer when it is installed.
    pub validation: bool,
    /// Application name reported to the driver.
    pub application_name: String,
    /// Capacity of each frame slot's staging buffer.
    pub staging_buffer_size: u64,
    /// Sizes of the shared descriptor pool.
    pub descriptor_pool: DescriptorPoolSizes,
    /// Optional sink for validation messages.
    pub debug_receiver: Option<Arc<dyn DebugMessageReceiver>>,
    /// Extra instance extensions, e.g. the surface extensions a window needs.
    pub instance_extensions: Vec<&'static CStr>,
}

impl CoreConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }

    /// Set the application name.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the per-frame staging buffer capacity.
    pub fn with_staging_buffer_size(mut self, size: u64) -> Self {
        self.staging_buffer_size = size;
        self
    }

    /// Set the descriptor pool sizes.
    pub fn with_descriptor_pool(mut self, sizes: DescriptorPoolSizes) -> Self {
        self.descriptor_pool = sizes;
        self
    }

    /// Route validation messages to `receiver` instead of the log.
    pub fn with_debug_receiver(mut self, receiver: Arc<dyn DebugMessageReceiver>) -> Self {
        self.debug_receiver = Some(receiver);
        self
    }

    /// Request additional instance extensions.
    pub fn with_instance_extensions(
        mut self,
        extensions: impl IntoIterator<Item = &'static CStr>,
    ) -> Self {
        self.instance_extensions.extend(extensions);
        self
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            application_name: "Lilium".to_string(),
            staging_buffer_size: DEFAULT_STAGING_BUFFER_SIZE,
            descriptor_pool: DescriptorPoolSizes::default(),
            debug_receiver: None,
            instance_extensions: Vec::new(),
        }
    }
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("validation", &self.validation)
            .field("application_name", &self.application_name)
            .field("staging_buffer_size", &self.staging_buffer_size)
            .field("descriptor_pool", &self.descriptor_pool)
            .field("debug_receiver", &self.debug_receiver.is_some())
            .field("instance_extensions", &self.instance_extensions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::new();
        assert_eq!(config.staging_buffer_size, 16_000_000);
        assert_eq!(config.descriptor_pool.max_sets, 1000);
        assert_eq!(config.descriptor_pool.combined_image_samplers, 5000);
        assert!(config.debug_receiver.is_none());
    }

    #[test]
    fn test_severity_to_log_level() {
        assert_eq!(DebugSeverity::Error.log_level(), log::Level::Error);
        assert_eq!(DebugSeverity::Verbose.log_level(), log::Level::Debug);
    }
}
