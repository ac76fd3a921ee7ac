// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use kiln_render::{Geometry, Vertex};
use tracing::debug;

use crate::error::{RenderResult, VkCall, VkError};

pub(crate) fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0 && props.memory_types[i as usize].property_flags.contains(flags)
    })
}

/// Host-visible vertex buffer, written once at creation.
#[derive(Default)]
pub(crate) struct VertexBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
}

impl VertexBuffer {
    /// Fills `self` as objects are created so teardown can clean a failure.
    pub unsafe fn upload(
        &mut self,
        instance: &ash::Instance,
        phys: vk::PhysicalDevice,
        device: &ash::Device,
        vertices: &[Vertex],
    ) -> RenderResult<()> {
        // vkCreateBuffer rejects a zero size.
        if vertices.is_empty() {
            return Ok(());
        }
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let size = bytes.len() as vk::DeviceSize;

        let buffer_info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        self.buffer =
            unsafe { device.create_buffer(&buffer_info, None) }.call("vkCreateBuffer")?;

        let req = unsafe { device.get_buffer_memory_requirements(self.buffer) };
        let mem_props = unsafe { instance.get_physical_device_memory_properties(phys) };
        let memory_type_index = find_memory_type(
            &mem_props,
            req.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .ok_or(VkError::NoHostVisibleMemory)?;

        let alloc_info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        self.memory =
            unsafe { device.allocate_memory(&alloc_info, None) }.call("vkAllocateMemory")?;
        unsafe { device.bind_buffer_memory(self.buffer, self.memory, 0) }
            .call("vkBindBufferMemory")?;

        let dst = unsafe { device.map_memory(self.memory, 0, size, vk::MemoryMapFlags::empty()) }
            .call("vkMapMemory")?;
        // SAFETY: the mapping spans `size` bytes and host-coherent memory needs no flush.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.cast::<u8>(), bytes.len());
            device.unmap_memory(self.memory);
        }
        debug!("uploaded {} vertices ({} bytes)", vertices.len(), size);
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
        self.buffer = vk::Buffer::null();
        self.memory = vk::DeviceMemory::null();
    }
}

/// What the command buffer draws between begin/end render pass.
#[derive(Default)]
pub(crate) enum DrawSource {
    #[default]
    Nothing,
    Procedural { vertex_count: u32 },
    Buffered { vertices: VertexBuffer, vertex_count: u32 },
}

impl DrawSource {
    /// `None` when the geometry needs a vertex buffer.
    fn without_buffer(geometry: &Geometry) -> Option<DrawSource> {
        if geometry.vertex_count() == 0 {
            return Some(DrawSource::Nothing);
        }
        match geometry {
            Geometry::Procedural { vertex_count } => Some(DrawSource::Procedural {
                vertex_count: *vertex_count,
            }),
            Geometry::Vertices(_) => None,
        }
    }

    pub unsafe fn create(
        instance: &ash::Instance,
        phys: vk::PhysicalDevice,
        device: &ash::Device,
        geometry: &Geometry,
        slot: &mut DrawSource,
    ) -> RenderResult<()> {
        if let Some(source) = Self::without_buffer(geometry) {
            if matches!(source, DrawSource::Nothing) {
                debug!("geometry is empty, nothing will be drawn");
            }
            *slot = source;
            return Ok(());
        }
        let Geometry::Vertices(vertices) = geometry else {
            return Ok(());
        };
        *slot = DrawSource::Buffered {
            vertices: VertexBuffer::default(),
            vertex_count: geometry.vertex_count(),
        };
        if let DrawSource::Buffered { vertices: vb, .. } = slot {
            unsafe { vb.upload(instance, phys, device, vertices) }?;
        }
        Ok(())
    }

    pub unsafe fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        match self {
            DrawSource::Nothing => {}
            DrawSource::Procedural { vertex_count } => unsafe {
                device.cmd_draw(cmd, *vertex_count, 1, 0, 0);
            },
            DrawSource::Buffered {
                vertices,
                vertex_count,
            } => unsafe {
                device.cmd_bind_vertex_buffers(cmd, 0, &[vertices.buffer], &[0]);
                device.cmd_draw(cmd, *vertex_count, 1, 0, 0);
            },
        }
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if let DrawSource::Buffered { vertices, .. } = self {
            unsafe { vertices.destroy(device) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, f) in props.memory_types.iter_mut().zip(flags) {
            slot.property_flags = *f;
        }
        props
    }

    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn picks_first_host_visible_type() {
        let props = memory_props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST,
            HOST | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        assert_eq!(find_memory_type(&props, 0b111, HOST), Some(1));
    }

    #[test]
    fn respects_type_bits() {
        let props = memory_props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST,
            HOST | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        assert_eq!(find_memory_type(&props, 0b100, HOST), Some(2));
        assert_eq!(find_memory_type(&props, 0b001, HOST), None);
    }

    #[test]
    fn empty_geometry_needs_no_buffer() {
        assert!(matches!(
            DrawSource::without_buffer(&Geometry::Vertices(Vec::new())),
            Some(DrawSource::Nothing)
        ));
        assert!(matches!(
            DrawSource::without_buffer(&Geometry::Procedural { vertex_count: 0 }),
            Some(DrawSource::Nothing)
        ));
        assert!(matches!(
            DrawSource::without_buffer(&Geometry::Procedural { vertex_count: 6 }),
            Some(DrawSource::Procedural { vertex_count: 6 })
        ));
        let triangle = Geometry::Vertices(kiln_render::TRIANGLE.to_vec());
        assert!(DrawSource::without_buffer(&triangle).is_none());
    }

    #[test]
    fn ignores_types_past_count() {
        let mut props = memory_props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[1].property_flags = HOST;
        assert_eq!(find_memory_type(&props, u32::MAX, HOST), None);
    }
}
