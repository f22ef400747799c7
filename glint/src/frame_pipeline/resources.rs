use std::mem;

use glam::UVec2;
use glint_gpu::{GlobalConstants, InstanceData, SHARC_CAPACITY};
use log::debug;

use crate::{
    Backend, BufferDesc, BufferId, ResourceRegistry, ResourceState,
    TextureDesc, TextureId,
};

/// Bytes per radiance cache hash entry.
const SHARC_HASH_ENTRY_SIZE: u64 = 8;

/// Bytes per radiance cache voxel.
const SHARC_VOXEL_SIZE: u64 = 16;

/// (Re)creates every texture used by passes.
///
/// Render-sized textures are allocated at output size too, so that changing
/// the resolution scale doesn't require reallocating anything; passes only
/// touch the render-sized corner of them.
pub fn create_textures(
    backend: &mut impl Backend,
    registry: &mut ResourceRegistry,
    size: UVec2,
) {
    debug!("Creating textures; size={}x{}", size.x, size.y);

    for id in TextureId::ALL {
        let mut usage = wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::TEXTURE_BINDING;

        if id == TextureId::Final {
            usage |= wgpu::TextureUsages::COPY_SRC;
        }

        registry.create_texture(
            backend,
            id,
            TextureDesc {
                label: texture_label(id),
                width: size.x,
                height: size.y,
                format: id.format(),
                usage,
            },
        );
    }
}

pub fn create_buffers(
    backend: &mut impl Backend,
    registry: &mut ResourceRegistry,
    max_instances: u32,
) {
    debug!("Creating buffers; max_instances={max_instances}");

    let buffers = [
        (
            BufferId::Constants,
            "glint_constants",
            mem::size_of::<GlobalConstants>() as u64,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        ),
        (
            BufferId::InstanceData,
            "glint_instance_data",
            max_instances as u64 * mem::size_of::<InstanceData>() as u64,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        ),
        (
            BufferId::SharcHashEntries,
            "glint_sharc_hash_entries",
            SHARC_CAPACITY as u64 * SHARC_HASH_ENTRY_SIZE,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        ),
        (
            BufferId::SharcVoxelData,
            "glint_sharc_voxel_data",
            SHARC_CAPACITY as u64 * SHARC_VOXEL_SIZE,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        ),
        (
            BufferId::SharcVoxelDataPrev,
            "glint_sharc_voxel_data_prev",
            SHARC_CAPACITY as u64 * SHARC_VOXEL_SIZE,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        ),
    ];

    for (id, label, size, usage) in buffers {
        registry.create_buffer(
            backend,
            id,
            BufferDesc {
                label: label.into(),
                size,
                usage,
                host_visible: false,
            },
        );
    }
}

/// Registers swapchain images, so that their layouts get tracked like
/// anything else's.
pub fn import_swapchain(
    backend: &mut impl Backend,
    registry: &mut ResourceRegistry,
) -> u32 {
    let textures = backend.swapchain_textures();

    for (idx, texture) in textures.iter().enumerate() {
        registry.import_texture(
            backend,
            TextureId::Swapchain(idx as u32),
            *texture,
            ResourceState::INITIAL,
        );
    }

    textures.len() as u32
}

fn texture_label(id: TextureId) -> String {
    let name = format!("{id:?}");
    let mut label = String::from("glint");

    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            label.push('_');
            label.push(ch.to_ascii_lowercase());
        } else {
            label.push(ch);
        }
    }

    label
}
