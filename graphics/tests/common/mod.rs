//! Common utilities for GPU integration tests.
//!
//! Tests that need a device obtain a [`TestContext`]; it is `None` on machines
//! without a Vulkan 1.3 device, and such tests return early.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use parking_lot::Mutex;

use lilium_gpu::{
    Buffer, BufferDescriptor, BufferUsage, Core, CoreConfig, DebugMessageReceiver, DebugSeverity,
    GraphicsResult, Texture, vk,
};

static LOGGER: Once = Once::new();

/// Install `env_logger` once per test binary.
pub fn init_logging() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Fill a buffer with a recognisable byte pattern.
pub fn generate_test_pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Collects validation errors so the owning test can fail on them.
///
/// Messages arrive on driver threads, where panicking is not allowed.
#[derive(Default)]
pub struct ValidationErrors {
    messages: Mutex<Vec<String>>,
}

impl ValidationErrors {
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl DebugMessageReceiver for ValidationErrors {
    fn debug_message(&self, severity: DebugSeverity, message: &str) {
        if severity == DebugSeverity::Error {
            eprintln!("validation error: {message}");
            self.messages.lock().push(message.to_string());
        }
    }
}

/// A core for one test.
///
/// Validation is on whenever the layer is installed; any validation error
/// fails the test when the context is dropped.
pub struct TestContext {
    pub core: Core,
    pub validation: Arc<ValidationErrors>,
}

impl TestContext {
    /// Bring up a core with default settings, or `None` without a usable device.
    pub fn new() -> Option<Self> {
        Self::with_config(CoreConfig::new())
    }

    pub fn with_config(config: CoreConfig) -> Option<Self> {
        init_logging();
        let validation = Arc::new(ValidationErrors::default());
        let config = config
            .with_validation(true)
            .with_debug_receiver(validation.clone());
        match Core::new(config) {
            Ok(core) => Some(Self { core, validation }),
            Err(e) => {
                eprintln!("No Vulkan device available, skipping: {e}");
                None
            }
        }
    }

    /// Validation errors reported so far.
    pub fn validation_errors(&self) -> Vec<String> {
        self.validation.take()
    }

    pub fn create_gpu_buffer(&self, size: u64, usage: BufferUsage) -> Arc<Buffer> {
        self.core
            .create_buffer(&BufferDescriptor::new(size, usage).with_label("test buffer"))
            .expect("buffer creation")
    }

    pub fn create_readback_buffer(&self, size: u64) -> Arc<Buffer> {
        self.core
            .create_buffer(
                &BufferDescriptor::new(size, BufferUsage::empty())
                    .with_label("readback")
                    .mappable(),
            )
            .expect("readback buffer creation")
    }

    /// Run one frame with `record` on the graphics command buffer, then wait idle.
    pub fn run_frame(&mut self, record: impl FnOnce(&Core)) {
        self.core.begin_frame();
        record(&self.core);
        self.core.end_frame();
        self.core.wait_idle();
    }

    /// Copy `src` back to the host after all queued work has run.
    pub fn read_buffer(&mut self, src: &Arc<Buffer>) -> Vec<u8> {
        let readback = self.create_readback_buffer(src.size());
        self.run_frame(|core| {
            let cmd = core.frame_command_buffer();
            src.acquire(cmd, vk::AccessFlags2::TRANSFER_READ);
            readback.acquire(cmd, vk::AccessFlags2::TRANSFER_WRITE);
            src.copy_to(cmd, &readback, src.size(), 0, 0);
        });
        readback.read_mapped(0, src.size()).expect("mapped readback")
    }

    /// Copy mip 0, layer 0 of a colour texture back to the host.
    pub fn read_texture(&mut self, texture: &Arc<Texture>, bytes_per_texel: u64) -> Vec<u8> {
        let size = u64::from(texture.width()) * u64::from(texture.height()) * bytes_per_texel;
        let readback = self.create_readback_buffer(size);
        self.run_frame(|core| {
            let cmd = core.frame_command_buffer();
            texture.transition(cmd, lilium_gpu::ImageLayout::TransferSrc);
            readback.acquire(cmd, vk::AccessFlags2::TRANSFER_WRITE);
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: texture.aspect(),
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: texture.width(),
                    height: texture.height(),
                    depth: 1,
                },
            };
            unsafe {
                core.handles().device().cmd_copy_image_to_buffer(
                    cmd.handle(),
                    texture.image(),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    readback.handle(),
                    &[region],
                )
            };
        });
        readback.read_mapped(0, size).expect("mapped readback")
    }

    pub fn pending_deletions(&self) -> usize {
        self.core.handles().deletion().pending_count()
    }
}

/// Shorthand for tests that only care that an operation failed cleanly.
pub fn is_invalid_parameter<T>(result: &GraphicsResult<T>) -> bool {
    matches!(result, Err(lilium_gpu::GraphicsError::InvalidParameter(_)))
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.core.wait_idle();
        let errors = self.validation.take();
        if !std::thread::panicking() {
            assert!(errors.is_empty(), "validation errors: {errors:#?}");
        }
    }
}
