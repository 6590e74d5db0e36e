//! Frame-in-flight synchronization
//!
//! One fence and one primary command buffer per frame in flight. Beginning
//! a frame waits for that frame's previous submission, so the CPU never
//! rewrites per-frame resources the GPU is still reading.

use ash::{vk, Device};

use super::commands::VulkanCommandRecorder;
use super::context::{VulkanContext, VulkanError, VulkanResult};

/// Per-frame fences and command buffers
pub struct FrameSync {
    device: Device,
    command_pool: vk::CommandPool,
    queue: vk::Queue,
    fences: Vec<vk::Fence>,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl FrameSync {
    /// Create synchronization for `frames_in_flight` frames
    pub fn new(context: &VulkanContext, frames_in_flight: usize) -> VulkanResult<Self> {
        let device = context.device.clone();

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(context.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight as u32);
        let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }.map_err(VulkanError::Api)?;

        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let mut fences = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            let fence = unsafe { device.create_fence(&fence_info, None) }.map_err(VulkanError::Api)?;
            fences.push(fence);
        }

        Ok(Self {
            device,
            command_pool: context.command_pool,
            queue: context.graphics_queue,
            fences,
            command_buffers,
        })
    }

    /// Wait for `frame`'s previous submission and start recording it again
    pub fn begin_frame(&self, frame: usize) -> VulkanResult<VulkanCommandRecorder> {
        let fence = self.fences[frame];
        let command_buffer = self.command_buffers[frame];

        unsafe {
            self.device.wait_for_fences(&[fence], true, u64::MAX).map_err(VulkanError::Api)?;
            self.device.reset_fences(&[fence]).map_err(VulkanError::Api)?;
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        Ok(VulkanCommandRecorder::new(self.device.clone(), command_buffer))
    }

    /// Finish recording and submit, signalling the frame's fence
    pub fn submit_frame(
        &self,
        frame: usize,
        recorder: VulkanCommandRecorder,
        wait: &[(vk::Semaphore, vk::PipelineStageFlags)],
        signal: &[vk::Semaphore],
    ) -> VulkanResult<()> {
        let command_buffers = [recorder.command_buffer()];
        let wait_semaphores: Vec<vk::Semaphore> = wait.iter().map(|(semaphore, _)| *semaphore).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = wait.iter().map(|(_, stage)| *stage).collect();

        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(signal)
            .build();

        unsafe {
            self.device.end_command_buffer(command_buffers[0]).map_err(VulkanError::Api)?;
            self.device
                .queue_submit(self.queue, &[submit], self.fences[frame])
                .map_err(VulkanError::Api)
        }
    }

    /// Number of frames in flight
    pub fn frames_in_flight(&self) -> usize {
        self.fences.len()
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.wait_for_fences(&self.fences, true, u64::MAX);
            for fence in self.fences.drain(..) {
                self.device.destroy_fence(fence, None);
            }
            self.device.free_command_buffers(self.command_pool, &self.command_buffers);
        }
    }
}
