use crate::{
    error::{TerrainError, TerrainResult},
    render::{BufferUsage, GpuBackend, PolygonMode},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadlessBuffer {
    pub id: usize,
    pub usage: BufferUsage,
    pub size: u64,
}

/// A recorded indexed draw call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawCall {
    pub vertex_buffer: usize,
    pub index_buffer: usize,
    pub index_count: u32,
    pub mode: PolygonMode,
}

/// A [`GpuBackend`] that keeps its buffers in main memory and records draw calls.
///
/// Used to run the terrain without a window, in tests and in the fly-over demo.
#[derive(Default)]
pub struct HeadlessBackend {
    buffers: Vec<Vec<u8>>,
    draws: Vec<DrawCall>,
    failing_allocations: usize,
    memory_limit: Option<u64>,
    allocated: u64,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets the next `count` buffer allocations fail.
    pub fn fail_next_allocations(&mut self, count: usize) {
        self.failing_allocations = count;
    }

    /// Lets allocations fail once `limit` bytes are in use.
    pub fn set_memory_limit(&mut self, limit: Option<u64>) {
        self.memory_limit = limit;
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated
    }

    pub fn buffer_data(&self, buffer: &HeadlessBuffer) -> &[u8] {
        &self.buffers[buffer.id]
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Returns and clears the draw calls recorded since the last call.
    pub fn take_draws(&mut self) -> Vec<DrawCall> {
        std::mem::take(&mut self.draws)
    }
}

impl GpuBackend for HeadlessBackend {
    type Buffer = HeadlessBuffer;

    fn create_buffer(
        &mut self,
        label: &'static str,
        usage: BufferUsage,
        size: u64,
    ) -> TerrainResult<Self::Buffer> {
        if self.failing_allocations > 0 {
            self.failing_allocations -= 1;
            return Err(TerrainError::GpuAllocation(format!(
                "{label}: refused {size} bytes"
            )));
        }
        if self
            .memory_limit
            .is_some_and(|limit| self.allocated + size > limit)
        {
            return Err(TerrainError::GpuAllocation(format!(
                "{label}: out of memory for {size} bytes"
            )));
        }

        self.allocated += size;
        self.buffers.push(vec![0; size as usize]);

        Ok(HeadlessBuffer {
            id: self.buffers.len() - 1,
            usage,
            size,
        })
    }

    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        let offset = offset as usize;
        self.buffers[buffer.id][offset..offset + data.len()].copy_from_slice(data);
    }

    fn draw_indexed(
        &mut self,
        vertices: &Self::Buffer,
        indices: &Self::Buffer,
        index_count: u32,
        mode: PolygonMode,
    ) {
        debug_assert!(index_count as u64 * 4 <= indices.size);

        self.draws.push(DrawCall {
            vertex_buffer: vertices.id,
            index_buffer: indices.id,
            index_count,
            mode,
        });
    }
}
