// Frames in flight
//
// A fixed ring of per-frame resource slots. Each slot carries a tag so the
// CPU side can't reuse a slot the GPU may still be reading:
//
//   Idle --begin_recording--> Recording --mark_submitted--> Submitted
//    ^                                                          |
//    +-------------------- mark_idle (fence signaled) ----------+
//
// Violating the order is a programming error and panics.

use super::error::{Result, VkResultExt};
use super::sync::FrameSync;
use super::VulkanDevice;
use ash::vk;
use std::sync::Arc;

/// What happened to one pass through the frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The slot's previous submission is still running; nothing changed.
    FenceTimeout,
    /// No image was available in time; the slot stays idle.
    AcquireTimeout,
    /// The swapchain must be recreated before the next frame.
    SwapchainOutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// CPU owns the slot; nothing in flight references it.
    Idle,
    Recording,
    /// Work referencing this slot was submitted; wait on its fence first.
    Submitted,
}

pub struct FrameRing<T> {
    slots: Vec<(T, FrameState)>,
    current: usize,
}

impl<T> FrameRing<T> {
    pub fn new(slots: Vec<T>) -> Self {
        assert!(!slots.is_empty(), "frame ring needs at least one slot");
        Self {
            slots: slots.into_iter().map(|slot| (slot, FrameState::Idle)).collect(),
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn state(&self) -> FrameState {
        self.slots[self.current].1
    }

    pub fn current(&self) -> &T {
        &self.slots[self.current].0
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().map(|(slot, _)| slot)
    }

    /// The current slot's fence has signaled.
    pub fn mark_idle(&mut self) {
        let state = &mut self.slots[self.current].1;
        assert_ne!(
            *state,
            FrameState::Recording,
            "frame {} marked idle while recording",
            self.current
        );
        *state = FrameState::Idle;
    }

    pub fn begin_recording(&mut self) -> &mut T {
        let (slot, state) = &mut self.slots[self.current];
        assert_eq!(
            *state,
            FrameState::Idle,
            "frame {} reused before its fence signaled",
            self.current
        );
        *state = FrameState::Recording;
        slot
    }

    /// Recording failed before submission; nothing references the slot.
    pub fn abort_recording(&mut self) {
        let state = &mut self.slots[self.current].1;
        if *state == FrameState::Recording {
            *state = FrameState::Idle;
        }
    }

    pub fn mark_submitted(&mut self) {
        let state = &mut self.slots[self.current].1;
        assert_eq!(
            *state,
            FrameState::Recording,
            "frame {} submitted without recording",
            self.current
        );
        *state = FrameState::Submitted;
    }

    /// Move to the next slot; returns the new current index.
    pub fn advance(&mut self) -> usize {
        assert_eq!(
            self.state(),
            FrameState::Submitted,
            "frame {} advanced before submission",
            self.current
        );
        self.current = (self.current + 1) % self.slots.len();
        self.current
    }

    /// The fence may only be reset once the slot is recording, right before
    /// the submission that signals it again.
    pub fn fence_reset_allowed(&self) -> bool {
        self.state() == FrameState::Recording
    }

    /// Apply the end of a frame cycle to the ring; returns the current index.
    ///
    /// Only a presented frame moves on. Every other outcome leaves the index
    /// where it is so the same slot is retried.
    pub fn settle(&mut self, outcome: FrameOutcome) -> usize {
        match outcome {
            FrameOutcome::Presented => {
                self.advance();
            }
            // Still Submitted, its fence untouched
            FrameOutcome::FenceTimeout => {}
            FrameOutcome::AcquireTimeout | FrameOutcome::SwapchainOutOfDate => {
                self.abort_recording();
                assert_eq!(
                    self.state(),
                    FrameState::Idle,
                    "frame {} failed acquire without waiting on its fence",
                    self.current
                );
            }
        }
        self.current
    }

    /// After a device-wide wait nothing is in flight.
    pub fn mark_all_idle(&mut self) {
        for (_, state) in &mut self.slots {
            *state = FrameState::Idle;
        }
    }
}

/// Per-frame GPU resources
pub struct FrameResources {
    pub command_buffer: vk::CommandBuffer,
    pub sync: FrameSync,
    pub framebuffer: vk::Framebuffer,
    device: Arc<VulkanDevice>,
}

impl FrameResources {
    /// `command_buffer` stays owned by its pool and is freed with it.
    pub fn new(device: Arc<VulkanDevice>, command_buffer: vk::CommandBuffer) -> Result<Self> {
        Ok(Self {
            command_buffer,
            sync: FrameSync::new(device.clone())?,
            framebuffer: vk::Framebuffer::null(),
            device,
        })
    }

    /// Replace this slot's framebuffer with one targeting `image_view`.
    ///
    /// Only legal while the slot is recording: the old framebuffer was used
    /// by work whose fence has already signaled.
    pub fn rebuild_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        image_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<()> {
        self.destroy_framebuffer();

        let attachments = [image_view];
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        self.framebuffer = unsafe { self.device.device.create_framebuffer(&create_info, None) }
            .vk_call("vkCreateFramebuffer")?;
        Ok(())
    }

    pub fn destroy_framebuffer(&mut self) {
        if self.framebuffer != vk::Framebuffer::null() {
            unsafe {
                self.device.device.destroy_framebuffer(self.framebuffer, None);
            }
            self.framebuffer = vk::Framebuffer::null();
        }
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        self.destroy_framebuffer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_frame<T>(ring: &mut FrameRing<T>) -> usize {
        ring.mark_idle();
        ring.begin_recording();
        ring.mark_submitted();
        ring.advance()
    }

    #[test]
    fn slots_are_reused_every_k_frames() {
        let mut ring = FrameRing::new(vec!['a', 'b', 'c']);
        let mut visited = vec![*ring.current()];
        for _ in 0..6 {
            run_frame(&mut ring);
            visited.push(*ring.current());
        }
        assert_eq!(visited, ['a', 'b', 'c', 'a', 'b', 'c', 'a']);
    }

    #[test]
    fn single_slot_ring_wraps_to_itself() {
        let mut ring = FrameRing::new(vec![()]);
        assert_eq!(run_frame(&mut ring), 0);
        assert_eq!(run_frame(&mut ring), 0);
    }

    #[test]
    fn states_follow_the_frame_cycle() {
        let mut ring = FrameRing::new(vec![0u8, 1]);
        assert_eq!(ring.state(), FrameState::Idle);
        ring.begin_recording();
        assert_eq!(ring.state(), FrameState::Recording);
        ring.mark_submitted();
        assert_eq!(ring.state(), FrameState::Submitted);
        ring.advance();

        // Back at slot 0 it is still in flight until its fence is seen
        ring.begin_recording();
        ring.mark_submitted();
        ring.advance();
        assert_eq!(ring.current_index(), 0);
        assert_eq!(ring.state(), FrameState::Submitted);
        ring.mark_idle();
        assert_eq!(ring.state(), FrameState::Idle);
    }

    #[test]
    #[should_panic(expected = "reused before its fence signaled")]
    fn reusing_submitted_slot_panics() {
        let mut ring = FrameRing::new(vec![()]);
        ring.begin_recording();
        ring.mark_submitted();
        ring.advance();
        ring.begin_recording();
    }

    #[test]
    #[should_panic(expected = "advanced before submission")]
    fn advancing_idle_slot_panics() {
        let mut ring = FrameRing::new(vec![(), ()]);
        ring.advance();
    }

    #[test]
    #[should_panic(expected = "submitted without recording")]
    fn submitting_idle_slot_panics() {
        let mut ring = FrameRing::new(vec![()]);
        ring.mark_submitted();
    }

    #[test]
    #[should_panic(expected = "at least one slot")]
    fn empty_ring_is_rejected() {
        let _ = FrameRing::<()>::new(Vec::new());
    }

    #[test]
    fn aborted_recording_returns_to_idle() {
        let mut ring = FrameRing::new(vec![()]);
        ring.begin_recording();
        ring.abort_recording();
        assert_eq!(ring.state(), FrameState::Idle);
        ring.begin_recording();
    }

    /// Slot 0 submitted and the ring wrapped back around to it.
    fn ring_back_at_submitted_slot() -> FrameRing<()> {
        let mut ring = FrameRing::new(vec![(), (), ()]);
        for _ in 0..3 {
            ring.mark_idle();
            ring.begin_recording();
            ring.mark_submitted();
            ring.settle(FrameOutcome::Presented);
        }
        ring
    }

    #[test]
    fn presented_frame_advances() {
        let mut ring = FrameRing::new(vec![(), (), ()]);
        ring.begin_recording();
        assert!(ring.fence_reset_allowed());
        ring.mark_submitted();
        assert_eq!(ring.settle(FrameOutcome::Presented), 1);
        assert_eq!(ring.state(), FrameState::Idle);
    }

    #[test]
    fn fence_timeout_keeps_slot_in_flight() {
        let mut ring = ring_back_at_submitted_slot();
        assert_eq!(ring.current_index(), 0);
        assert_eq!(ring.state(), FrameState::Submitted);

        assert_eq!(ring.settle(FrameOutcome::FenceTimeout), 0);
        assert_eq!(ring.state(), FrameState::Submitted);
        assert!(!ring.fence_reset_allowed());
    }

    #[test]
    fn failed_acquire_leaves_slot_idle_and_fence_signaled() {
        for outcome in [FrameOutcome::AcquireTimeout, FrameOutcome::SwapchainOutOfDate] {
            let mut ring = ring_back_at_submitted_slot();
            ring.mark_idle();

            assert_eq!(ring.settle(outcome), 0, "{outcome:?}");
            assert_eq!(ring.state(), FrameState::Idle, "{outcome:?}");
            assert!(!ring.fence_reset_allowed(), "{outcome:?}");

            // The retry can record into the same slot
            ring.begin_recording();
        }
    }

    #[test]
    fn retried_slot_advances_once_presented() {
        let mut ring = ring_back_at_submitted_slot();
        ring.settle(FrameOutcome::FenceTimeout);
        ring.mark_idle();
        ring.settle(FrameOutcome::AcquireTimeout);
        ring.begin_recording();
        ring.mark_submitted();
        assert_eq!(ring.settle(FrameOutcome::Presented), 1);
    }

    #[test]
    #[should_panic(expected = "advanced before submission")]
    fn presenting_unsubmitted_slot_panics() {
        let mut ring = FrameRing::new(vec![(), ()]);
        ring.settle(FrameOutcome::Presented);
    }

    #[test]
    fn device_wait_clears_every_slot() {
        let mut ring = FrameRing::new(vec![(), ()]);
        for _ in 0..2 {
            ring.begin_recording();
            ring.mark_submitted();
            ring.advance();
        }
        ring.mark_all_idle();
        ring.begin_recording();
    }
}
