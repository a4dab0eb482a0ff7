//! GPU integration tests for the graphics core.
//!
//! Every test needs a Vulkan 1.3 device and returns early without one.
//!
//! # Test Categories
//!
//! - **Upload Tests**: staged buffer and texture uploads, verified by readback
//! - **Frame Tests**: frame rotation and deferred deletion timing
//! - **Resource Tests**: descriptor sets, samplers, sync objects
//! - **Allocator Tests**: sub-allocated buffers and the bindless table
//!
//! ```bash
//! cargo test --test gpu_tests
//! ```

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::{TestContext, generate_test_pattern, is_invalid_parameter};
use lilium_gpu::{
    BindlessTextureManager, BufferDescriptor, BufferUsage, ComputePipelineBuilder, CoreConfig,
    DescriptorSetLayoutBuilder, Event, Fence, GraphicsError, ImageLayout, NUM_FRAMES_IN_FLIGHT,
    PipelineLayoutBuilder, SamplerBuilder, ShaderModule, SubAllocatedBuffer, TextureDescriptor,
    TextureFormat, types::mip_regions, vk,
};

/// `void main() {}` as a 1x1x1 GLSL compute shader.
const EMPTY_COMPUTE_SPIRV: &[u32] = &[
    0x0723_0203, 0x0001_0000, 0, 5, 0, // header, id bound 5
    0x0002_0011, 1, // OpCapability Shader
    0x0003_000e, 0, 1, // OpMemoryModel Logical GLSL450
    0x0005_000f, 5, 1, 0x6e69_616d, 0, // OpEntryPoint GLCompute %1 "main"
    0x0006_0010, 1, 17, 1, 1, 1, // OpExecutionMode %1 LocalSize 1 1 1
    0x0002_0013, 2, // %2 = OpTypeVoid
    0x0003_0021, 3, 2, // %3 = OpTypeFunction %2
    0x0005_0036, 2, 1, 0, 3, // %1 = OpFunction %2 None %3
    0x0002_00f8, 4, // %4 = OpLabel
    0x0001_00fd, // OpReturn
    0x0001_0038, // OpFunctionEnd
];

// ============================================================================
// Upload Tests
// ============================================================================

#[rstest]
#[case::small(16)]
#[case::unaligned(1023)]
#[case::large(256 * 1024)]
fn test_buffer_upload_roundtrip(#[case] size: usize) {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };

    let data = generate_test_pattern(size);
    let buffer = ctx.create_gpu_buffer(size as u64, BufferUsage::STORAGE);
    ctx.core.queue_buffer_upload(&buffer, &data, 0).unwrap();

    assert_eq!(ctx.read_buffer(&buffer), data);
}

#[test]
fn test_create_buffer_with_data() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };

    let data = generate_test_pattern(512);
    let buffer = ctx
        .core
        .create_buffer_with_data(&BufferDescriptor::new(512, BufferUsage::VERTEX), &data)
        .unwrap();

    assert_eq!(ctx.read_buffer(&buffer), data);
}

#[test]
fn test_uploads_within_frame_land_at_offsets() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };

    let buffer = ctx.create_gpu_buffer(256, BufferUsage::STORAGE);
    ctx.run_frame(|core| {
        core.queue_buffer_upload(&buffer, &[1; 64], 0).unwrap();
        core.queue_buffer_upload(&buffer, &[2; 64], 128).unwrap();
        assert_eq!(core.staging_used(), 128);
    });

    let contents = ctx.read_buffer(&buffer);
    assert!(contents[..64].iter().all(|&b| b == 1));
    assert!(contents[128..192].iter().all(|&b| b == 2));
}

#[test]
fn test_staging_exhaustion_is_recoverable() {
    let Some(mut ctx) =
        TestContext::with_config(CoreConfig::new().with_staging_buffer_size(1024))
    else {
        return;
    };

    let buffer = ctx.create_gpu_buffer(1024, BufferUsage::STORAGE);
    ctx.core.queue_buffer_upload(&buffer, &[7; 768], 0).unwrap();

    let result = ctx.core.queue_buffer_upload(&buffer, &[9; 512], 512);
    assert_eq!(
        result,
        Err(GraphicsError::StagingExhausted {
            requested: 512,
            remaining: 256,
        })
    );

    // The next cycle has a fresh staging offset.
    ctx.run_frame(|_| {});
    ctx.run_frame(|core| {
        core.queue_buffer_upload(&buffer, &[9; 512], 512).unwrap();
    });
    let contents = ctx.read_buffer(&buffer);
    assert!(contents[512..].iter().all(|&b| b == 9));
}

#[test]
fn test_upload_out_of_range_rejected() {
    let Some(ctx) = TestContext::new() else {
        return;
    };

    let buffer = ctx.create_gpu_buffer(64, BufferUsage::STORAGE);
    assert!(is_invalid_parameter(
        &ctx.core.queue_buffer_upload(&buffer, &[0; 32], 48)
    ));
    assert_eq!(ctx.core.staging_used(), 0);
}

#[test]
fn test_zero_sized_buffer_rejected() {
    let Some(ctx) = TestContext::new() else {
        return;
    };

    let result = ctx
        .core
        .create_buffer(&BufferDescriptor::new(0, BufferUsage::VERTEX));
    assert!(is_invalid_parameter(&result));
}

#[rstest]
#[case::single_mip(Some(1))]
#[case::full_chain(None)]
fn test_texture_upload(#[case] mips: Option<u32>) {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };

    let texture = ctx
        .core
        .create_texture(
            &TextureDescriptor::new_2d(16, 16, TextureFormat::Rgba8Unorm)
                .with_full_mip_chain()
                .with_label("upload target"),
        )
        .unwrap();
    assert_eq!(texture.mip_level_count(), 5);

    let levels = mips.unwrap_or(texture.mip_level_count());
    let total: u64 = mip_regions(texture.size(), 1, texture.format(), levels)
        .iter()
        .map(|r| r.size)
        .sum();
    let data = generate_test_pattern(total as usize);

    ctx.core.queue_texture_upload(&texture, &data, mips).unwrap();
    assert_eq!(texture.layout(), ImageLayout::ShaderReadOnly);

    let texels = ctx.read_texture(&texture, 4);
    assert_eq!(texels, data[..16 * 16 * 4]);
}

#[test]
fn test_texture_upload_validation() {
    let Some(ctx) = TestContext::new() else {
        return;
    };

    let texture = ctx
        .core
        .create_texture(&TextureDescriptor::new_2d(8, 8, TextureFormat::Rgba8Unorm))
        .unwrap();

    // Too few bytes for mip 0.
    assert!(is_invalid_parameter(
        &ctx.core.queue_texture_upload(&texture, &[0; 16], None)
    ));
    // More mips than the texture has.
    assert!(is_invalid_parameter(
        &ctx.core.queue_texture_upload(&texture, &[0; 1024], Some(2))
    ));
    assert_eq!(texture.layout(), ImageLayout::Undefined);
}

#[test]
fn test_buffer_to_texture_copy() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };

    let data = generate_test_pattern(8 * 8 * 4);
    let source = ctx
        .core
        .create_buffer_with_data(&BufferDescriptor::new(1024, BufferUsage::STORAGE), &data)
        .unwrap();
    let texture = ctx
        .core
        .create_texture(&TextureDescriptor::new_2d(8, 8, TextureFormat::Rgba8Unorm))
        .unwrap();

    // The staged upload into `source` runs first within the same upload batch.
    ctx.core.queue_buffer_to_texture_copy(&source, &texture, 0).unwrap();
    assert!(is_invalid_parameter(
        &ctx.core.queue_buffer_to_texture_copy(&source, &texture, 1000)
    ));

    assert_eq!(ctx.read_texture(&texture, 4), data);
}

// ============================================================================
// Frame Tests
// ============================================================================

#[test]
fn test_frame_index_rotation() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };

    let count = ctx.core.num_frames_in_flight();
    assert_eq!(count, 2);

    let mut seen = Vec::new();
    for _ in 0..4 {
        ctx.core.begin_frame();
        assert!(ctx.core.in_frame());
        seen.push(ctx.core.frame_index());
        assert_eq!(ctx.core.next_frame_index(), (ctx.core.frame_index() + 1) % count);
        assert_eq!(
            ctx.core.previous_frame_index(),
            (ctx.core.frame_index() + count - 1) % count
        );
        ctx.core.end_frame();
    }
    assert_eq!(seen, vec![1, 0, 1, 0]);
    ctx.core.wait_idle();
}

#[test]
fn test_drop_in_frame_defers_until_slot_reuse() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };

    let buffer = ctx.create_gpu_buffer(64, BufferUsage::UNIFORM);
    let before = ctx.pending_deletions();

    ctx.core.begin_frame();
    ctx.core.destroy_buffer(buffer);
    // Buffer handle plus its memory.
    assert_eq!(ctx.pending_deletions(), before + 2);
    ctx.core.end_frame();

    // The other slot: nothing released yet.
    ctx.core.begin_frame();
    assert_eq!(ctx.pending_deletions(), before + 2);
    ctx.core.end_frame();

    // Same slot again: released after its fence wait.
    ctx.core.begin_frame();
    assert_eq!(ctx.pending_deletions(), before);
    ctx.core.end_frame();
    ctx.core.wait_idle();
}

#[test]
fn test_destroy_outside_frame_is_immediate() {
    let Some(ctx) = TestContext::new() else {
        return;
    };

    let buffer = ctx.create_gpu_buffer(64, BufferUsage::UNIFORM);
    let texture = ctx
        .core
        .create_texture(&TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm))
        .unwrap();
    let before = ctx.pending_deletions();

    ctx.core.destroy_buffer(buffer);
    ctx.core.destroy_texture(texture);
    assert_eq!(ctx.pending_deletions(), before);
}

#[test]
fn test_destroy_with_other_references_defers() {
    let Some(ctx) = TestContext::new() else {
        return;
    };

    let buffer = ctx.create_gpu_buffer(64, BufferUsage::UNIFORM);
    let other = Arc::clone(&buffer);
    let before = ctx.pending_deletions();

    ctx.core.destroy_buffer(buffer);
    assert_eq!(ctx.pending_deletions(), before);
    drop(other);
    assert_eq!(ctx.pending_deletions(), before + 2);
}

#[test]
fn test_headless_frames_leave_completion_unsignaled() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };

    // More frames than slots, so every slot is reused without a present.
    for _ in 0..NUM_FRAMES_IN_FLIGHT * 3 {
        ctx.run_frame(|_| {});
        assert!(!ctx.core.frame_completion_signaled());
    }

    ctx.core.begin_frame();
    assert!(!ctx.core.frame_completion_signaled());
    ctx.core.end_frame();
    ctx.core.wait_idle();
    assert!(ctx.validation_errors().is_empty());
}

// ============================================================================
// Resource Tests
// ============================================================================

#[test]
fn test_descriptor_set_with_buffer_and_texture() {
    let Some(ctx) = TestContext::new() else {
        return;
    };

    let layout = DescriptorSetLayoutBuilder::new()
        .binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::ALL)
        .binding(
            1,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            vk::ShaderStageFlags::FRAGMENT,
        )
        .build(ctx.core.handles());
    let set = ctx.core.create_descriptor_set(&layout);

    let buffer = ctx.create_gpu_buffer(256, BufferUsage::UNIFORM);
    let texture = ctx
        .core
        .create_texture(&TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm))
        .unwrap();
    let sampler = SamplerBuilder::new().build(ctx.core.handles());

    let updater = set
        .updater()
        .add_buffer(0, &buffer)
        .add_texture(1, &texture, Some(&sampler));
    assert_eq!(updater.len(), 2);
    updater.update();

    let before = ctx.pending_deletions();
    drop(set);
    assert_eq!(ctx.pending_deletions(), before + 1);
}

#[test]
fn test_variable_count_descriptor_set() {
    let Some(ctx) = TestContext::new() else {
        return;
    };

    let layout = DescriptorSetLayoutBuilder::new()
        .binding(
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            256,
            vk::ShaderStageFlags::FRAGMENT,
        )
        .partially_bound()
        .variable_descriptor_count()
        .build(ctx.core.handles());
    let set = ctx.core.create_descriptor_set_variable(&layout, 64);
    assert_ne!(set.handle(), vk::DescriptorSet::null());
}

#[test]
fn test_sampler_anisotropy_clamped() {
    let Some(ctx) = TestContext::new() else {
        return;
    };

    let sampler = SamplerBuilder::new()
        .max_anisotropy(1024.0)
        .build(ctx.core.handles());
    assert_ne!(sampler.handle(), vk::Sampler::null());
    assert_eq!(sampler.descriptor().max_anisotropy, 1024.0);
}

#[test]
fn test_compute_pipeline_dispatch() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };

    let set_layout = DescriptorSetLayoutBuilder::new()
        .binding(0, vk::DescriptorType::STORAGE_BUFFER, 1, vk::ShaderStageFlags::COMPUTE)
        .build(ctx.core.handles());
    let layout = PipelineLayoutBuilder::new()
        .push_constants(vk::ShaderStageFlags::COMPUTE, 0, 16)
        .descriptor_set(&set_layout)
        .build(ctx.core.handles());
    assert_eq!(layout.push_constant_ranges().len(), 1);
    assert_eq!(layout.set_layouts().len(), 1);

    let shader = ShaderModule::new(ctx.core.handles(), EMPTY_COMPUTE_SPIRV).unwrap();
    let pipeline = ComputePipelineBuilder::new(&layout)
        .shader(&shader)
        .build(ctx.core.handles())
        .unwrap();
    assert_eq!(pipeline.bind_point(), vk::PipelineBindPoint::COMPUTE);

    let buffer = ctx.create_gpu_buffer(64, BufferUsage::STORAGE);
    let set = ctx.core.create_descriptor_set(&set_layout);
    set.updater().add_buffer(0, &buffer).update();

    ctx.run_frame(|core| {
        let cmd = core.frame_command_buffer();
        cmd.bind_pipeline(&pipeline);
        cmd.bind_descriptor_set(vk::PipelineBindPoint::COMPUTE, &layout, 0, &set);
        cmd.push_constants(&layout, vk::ShaderStageFlags::COMPUTE, 0, &[1u32, 2, 3, 4]);
        cmd.dispatch(1, 1, 1);
    });
}

#[test]
fn test_invalid_shader_code_rejected() {
    let Some(ctx) = TestContext::new() else {
        return;
    };

    assert!(is_invalid_parameter(&ShaderModule::new(ctx.core.handles(), &[])));
    // Not a whole number of words.
    assert!(is_invalid_parameter(&ShaderModule::from_bytes(
        ctx.core.handles(),
        &[0x03, 0x02, 0x23]
    )));

    let layout = PipelineLayoutBuilder::new().build(ctx.core.handles());
    assert!(is_invalid_parameter(
        &ComputePipelineBuilder::new(&layout).build(ctx.core.handles())
    ));
}

#[test]
fn test_sync_objects() {
    let Some(ctx) = TestContext::new() else {
        return;
    };

    let fence = Fence::new(ctx.core.handles(), true);
    assert!(fence.is_signaled());
    fence.reset();
    assert!(!fence.is_signaled());

    let event = Event::new(ctx.core.handles());
    assert!(!event.is_set());
    event.set();
    assert!(event.is_set());
    event.reset();
    assert!(!event.is_set());
}

#[test]
fn test_device_info() {
    let Some(ctx) = TestContext::new() else {
        return;
    };

    let info = ctx.core.device_info();
    assert!(!info.name.is_empty());
    assert!(info.timestamp_period > 0.0);
}

// ============================================================================
// Allocator Tests
// ============================================================================

#[test]
fn test_sub_allocated_buffer() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };

    let pool = SubAllocatedBuffer::new(&ctx.core, 4096, BufferUsage::VERTEX, "vertices").unwrap();
    let (a_offset, a) = pool.allocate(1024).unwrap();
    let (b_offset, b) = pool.allocate(2048).unwrap();
    assert_eq!(pool.used(), 3072);

    pool.free(a);
    let (c_offset, c) = pool.allocate(512).unwrap();
    assert!(c_offset >= a_offset && c_offset + 512 <= a_offset + 1024);
    assert!(c_offset < b_offset);

    ctx.core
        .queue_buffer_upload(pool.buffer(), &[3; 512], c_offset)
        .unwrap();
    let contents = ctx.read_buffer(pool.buffer());
    assert!(contents[c_offset as usize..c_offset as usize + 512].iter().all(|&x| x == 3));

    assert!(matches!(
        pool.allocate(4096),
        Err(GraphicsError::SubAllocationExhausted { .. })
    ));
    pool.free(b);
    pool.free(c);
    assert_eq!(pool.allocation_count(), 0);
    let (offset, _) = pool.allocate(4096).unwrap();
    assert_eq!(offset, 0);
}

#[test]
fn test_bindless_texture_manager() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };

    let bindless = BindlessTextureManager::new(ctx.core.handles(), 16);
    let textures: Vec<_> = (0..3)
        .map(|_| {
            ctx.core
                .create_texture(&TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm))
                .unwrap()
        })
        .collect();
    for texture in &textures {
        ctx.core
            .queue_texture_upload(texture, &[255; 64], None)
            .unwrap();
    }

    let slots: Vec<_> = textures
        .iter()
        .map(|t| bindless.allocate_texture_handle(Arc::clone(t)).unwrap())
        .collect();
    assert_eq!(
        slots.iter().map(|s| s.index()).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    bindless.free_texture_handle(slots[1]);
    bindless.set_texture_at(slots[2], Arc::clone(&textures[0]));
    assert!(Arc::ptr_eq(
        &bindless.texture(slots[2]).unwrap(),
        &textures[0]
    ));

    ctx.run_frame(|_| bindless.update_descriptors_if_necessary());

    let reused = bindless
        .allocate_texture_handle(Arc::clone(&textures[1]))
        .unwrap();
    assert_eq!(reused.index(), 1);
    assert_eq!(bindless.len(), 3);
}
