//! Window surfaces and the presentable image chain.
//!
//! # Example
//!
//! ```ignore
//! let surface = core.create_surface(display_handle, window_handle)?;
//! let mut swapchain = core.create_swapchain(surface, 1280, 720, true);
//! let acquire_fence = Fence::new(core.handles(), false);
//!
//! // In the render loop:
//! core.begin_frame();
//! if let Some(image) = swapchain.acquire(&acquire_fence) {
//!     let cmd = core.frame_command_buffer();
//!     cmd.clear_color(&image, [0.1, 0.1, 0.1, 1.0]);
//!     image.transition(cmd, ImageLayout::PresentSrc);
//!     core.end_frame_for_present();
//!     swapchain.present(&core);
//! } else {
//!     core.end_frame();
//! }
//! ```

use std::sync::Arc;

use ash::vk;

use crate::core::Core;
use crate::error::fatal_vk_error;
use crate::types::TextureFormat;
use crate::vulkan::conversion::texture_format_from_vk;
use crate::vulkan::{DeviceContext, Fence, ImageLayout};
use crate::{profile_function, vk_check};

const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// A presentable window surface.
///
/// The window must outlive the surface.
pub struct Surface {
    context: Arc<DeviceContext>,
    surface: vk::SurfaceKHR,
}

impl Surface {
    pub(crate) fn new(context: &Arc<DeviceContext>, surface: vk::SurfaceKHR) -> Self {
        Self {
            context: Arc::clone(context),
            surface,
        }
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn capabilities(&self) -> vk::SurfaceCapabilitiesKHR {
        vk_check!(unsafe {
            self.context
                .surface_loader()
                .get_physical_device_surface_capabilities(self.context.physical_device(), self.surface)
        })
    }

    pub fn formats(&self) -> Vec<vk::SurfaceFormatKHR> {
        vk_check!(unsafe {
            self.context
                .surface_loader()
                .get_physical_device_surface_formats(self.context.physical_device(), self.surface)
        })
    }

    pub fn present_modes(&self) -> Vec<vk::PresentModeKHR> {
        vk_check!(unsafe {
            self.context
                .surface_loader()
                .get_physical_device_surface_present_modes(
                    self.context.physical_device(),
                    self.surface,
                )
        })
    }

    /// Whether the present queue can present to this surface.
    pub fn is_supported(&self) -> bool {
        unsafe {
            self.context
                .surface_loader()
                .get_physical_device_surface_support(
                    self.context.physical_device(),
                    self.context.queues().families.present,
                    self.surface,
                )
        }
        .unwrap_or(false)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.context
                .surface_loader()
                .destroy_surface(self.surface, None)
        };
    }
}

/// The image chain of a surface.
///
/// Images are exposed as borrowed [`Texture`](crate::Texture)s, left in
/// [`ImageLayout::PresentSrc`] after (re)creation. Frame work that renders to
/// an acquired image must transition it back to `PresentSrc` before
/// [`present`](Self::present).
pub struct Swapchain {
    context: Arc<DeviceContext>,
    swapchain: vk::SwapchainKHR,
    textures: Vec<Arc<crate::Texture>>,
    /// Cached after the first query.
    surface_format: Option<vk::SurfaceFormatKHR>,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    requested: vk::Extent2D,
    vsync: bool,
    /// Acquired and not yet presented.
    current_image: Option<u32>,
    surface: Surface,
}

impl Swapchain {
    pub(crate) fn new(
        context: &Arc<DeviceContext>,
        surface: Surface,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Self {
        if !surface.is_supported() {
            log::warn!(
                "Queue family {} does not report present support for this surface",
                context.queues().families.present
            );
        }

        let mut swapchain = Self {
            context: Arc::clone(context),
            swapchain: vk::SwapchainKHR::null(),
            textures: Vec::new(),
            surface_format: None,
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            requested: vk::Extent2D { width, height },
            vsync,
            current_image: None,
            surface,
        };
        swapchain.recreate(width, height);
        swapchain
    }

    /// Rebuild the image chain for a new size.
    ///
    /// Waits for the device to go idle. A zero-sized surface (minimized window)
    /// keeps the current chain.
    pub fn recreate(&mut self, width: u32, height: u32) {
        profile_function!();

        self.requested = vk::Extent2D { width, height };
        let capabilities = self.surface.capabilities();
        let extent = choose_extent(&capabilities, width, height);
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Surface has zero extent, skipping swapchain recreation");
            return;
        }

        self.context.wait_idle();

        let surface_format = self.surface_format();
        let present_mode = choose_present_mode(&self.surface.present_modes(), self.vsync);
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST;
        let old_swapchain = self.swapchain;

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle())
            .min_image_count(capabilities.min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let context = Arc::clone(&self.context);
        let loader = context.swapchain_loader();
        let swapchain = vk_check!(unsafe { loader.create_swapchain(&create_info, None) });

        self.release_images();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { loader.destroy_swapchain(old_swapchain, None) };
        }

        let images = vk_check!(unsafe { loader.get_swapchain_images(swapchain) });
        let format = texture_format_from_vk(surface_format.format).unwrap_or(TextureFormat::Bgra8Unorm);
        self.textures = images
            .iter()
            .enumerate()
            .map(|(i, &image)| {
                let texture = crate::Texture::borrowed(
                    &self.context,
                    image,
                    surface_format.format,
                    format,
                    extent.width,
                    extent.height,
                    usage,
                );
                self.context.set_object_name(image, &format!("swapchain image {i}"));
                Arc::new(texture)
            })
            .collect();

        self.context.immediate_submit(|cmd| {
            for texture in &self.textures {
                texture.transition(cmd, ImageLayout::PresentSrc);
            }
        });

        self.swapchain = swapchain;
        self.extent = extent;
        self.present_mode = present_mode;
        self.current_image = None;

        log::info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            self.textures.len(),
            surface_format.format,
            present_mode
        );
    }

    /// Acquire the next image.
    ///
    /// `fence` must be unsignaled. It is signaled by the acquire, waited on, and
    /// reset again before this returns. An out-of-date chain is recreated and
    /// the acquire retried once; `None` means no image could be acquired.
    pub fn acquire(&mut self, fence: &Fence) -> Option<Arc<crate::Texture>> {
        profile_function!();

        if self.swapchain == vk::SwapchainKHR::null() {
            self.recreate(self.requested.width, self.requested.height);
            if self.swapchain == vk::SwapchainKHR::null() {
                return None;
            }
        }

        for attempt in 0..2 {
            let result = unsafe {
                self.context.swapchain_loader().acquire_next_image(
                    self.swapchain,
                    u64::MAX,
                    vk::Semaphore::null(),
                    fence.handle(),
                )
            };
            match result {
                Ok((index, _suboptimal)) => {
                    fence.wait();
                    fence.reset();
                    self.current_image = Some(index);
                    return self.textures.get(index as usize).cloned();
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) if attempt == 0 => {
                    log::debug!("Swapchain out of date on acquire, recreating");
                    self.recreate(self.requested.width, self.requested.height);
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return None,
                Err(e) => fatal_vk_error(e, file!(), line!()),
            }
        }
        None
    }

    /// Present the last acquired image once the current frame's work completes.
    ///
    /// Call once per frame, after [`Core::end_frame_for_present`]. Does nothing
    /// when no image is held, e.g. after [`acquire`](Self::acquire) returned
    /// `None`. An out-of-date or suboptimal chain is recreated from the
    /// current surface size.
    ///
    /// # Panics
    ///
    /// Panics if an image is held but the frame was closed with
    /// [`Core::end_frame`], which does not signal the completion semaphore.
    pub fn present(&mut self, core: &Core) {
        profile_function!();

        let Some(image_index) = self.current_image.take() else {
            log::debug!("No acquired swapchain image, skipping present");
            return;
        };
        assert!(
            core.frame_completion_signaled(),
            "present requires the frame to be closed with end_frame_for_present"
        );

        let wait_semaphores = [core.frame_completion_semaphore().handle()];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match self.context.queue_present(&present_info) {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date or suboptimal on present, recreating");
                self.recreate(self.requested.width, self.requested.height);
            }
            Err(e) => fatal_vk_error(e, file!(), line!()),
        }
    }

    /// Switch between FIFO and immediate presentation, rebuilding the chain.
    pub fn set_vsync(&mut self, vsync: bool) {
        if self.vsync == vsync {
            return;
        }
        self.vsync = vsync;
        self.recreate(self.requested.width, self.requested.height);
    }

    fn surface_format(&mut self) -> vk::SurfaceFormatKHR {
        if let Some(format) = self.surface_format {
            return format;
        }
        let format = choose_surface_format(&self.surface.formats());
        self.surface_format = Some(format);
        format
    }

    /// Destroy the wrapped textures nobody else holds; the rest drop deferred.
    fn release_images(&mut self) {
        for texture in self.textures.drain(..) {
            if let Ok(texture) = Arc::try_unwrap(texture) {
                // SAFETY: callers wait for the device to go idle first
                unsafe { texture.destroy_immediately() };
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.map_or(vk::Format::UNDEFINED, |f| f.format)
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Index of the image acquired for the frame in progress, if any.
    pub fn current_image_index(&self) -> Option<u32> {
        self.current_image
    }

    pub fn image_count(&self) -> usize {
        self.textures.len()
    }

    pub fn images(&self) -> &[Arc<crate::Texture>] {
        &self.textures
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.context.wait_idle();
        self.release_images();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.context
                    .swapchain_loader()
                    .destroy_swapchain(self.swapchain, None)
            };
        }
        log::debug!("Swapchain destroyed");
    }
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("extent", &self.extent)
            .field("images", &self.textures.len())
            .field("present_mode", &self.present_mode)
            .finish()
    }
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| *f == PREFERRED_FORMAT)
        .or_else(|| formats.first().copied())
        .unwrap_or(PREFERRED_FORMAT)
}

fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_format_wins() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, PREFERRED_FORMAT]), PREFERRED_FORMAT);
        assert_eq!(choose_surface_format(&[unorm]), unorm);
        assert_eq!(choose_surface_format(&[]), PREFERRED_FORMAT);
    }

    #[test]
    fn test_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_follows_surface_when_defined() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        assert_eq!(
            choose_extent(&capabilities, 1920, 1080),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn test_extent_clamped_when_undefined() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        assert_eq!(
            choose_extent(&capabilities, 4096, 0),
            vk::Extent2D {
                width: 1024,
                height: 1
            }
        );
    }
}
