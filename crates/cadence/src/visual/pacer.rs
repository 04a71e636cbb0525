//! Turns (image, duration, frame rate) into evenly spaced frames, one per capacity grant.

use std::collections::VecDeque;

use crate::media::types::ImageFrame;

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// How many frames an image yields and how far apart they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePlan {
    pub frame_count: u32,
    pub frame_duration_us: u64,
}

impl FramePlan {
    /// `frame_count = floor(frame_rate * duration_us / 1e6)`,
    /// `frame_duration_us = floor(1e6 / frame_rate)`.
    ///
    /// Returns `None` for a non-positive or non-finite frame rate.
    pub fn compute(duration_us: u64, frame_rate: f32) -> Option<Self> {
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return None;
        }
        let rate = f64::from(frame_rate);
        let frame_count = (rate * duration_us as f64 / MICROS_PER_SECOND).floor();
        let frame_duration_us = (MICROS_PER_SECOND / rate).floor();
        Some(Self {
            frame_count: frame_count.min(f64::from(u32::MAX)) as u32,
            frame_duration_us: frame_duration_us as u64,
        })
    }
}

/// An image with frames still owed downstream.
#[derive(Debug, Clone)]
pub struct PendingImage {
    pub image: ImageFrame,
    pub frame_duration_us: u64,
    pub frame_count: u32,
    pub frames_remaining: u32,
}

impl PendingImage {
    pub fn new(image: ImageFrame, plan: FramePlan) -> Self {
        Self {
            image,
            frame_duration_us: plan.frame_duration_us,
            frame_count: plan.frame_count,
            frames_remaining: plan.frame_count,
        }
    }

    /// True until the first frame of this image has been committed.
    pub fn is_untouched(&self) -> bool {
        self.frames_remaining == self.frame_count
    }
}

/// Result of committing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacedFrame {
    pub presentation_time_us: u64,
    /// The frame was the last one of its image; the image has been dequeued.
    pub image_finished: bool,
}

/// FIFO of pending images plus the downstream capacity counter and presentation clock.
#[derive(Debug, Default)]
pub struct FramePacer {
    pending: VecDeque<PendingImage>,
    capacity: u32,
    presentation_time_us: u64,
}

impl FramePacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Downstream can take one more frame.
    pub fn grant_capacity(&mut self) {
        self.capacity = self.capacity.saturating_add(1);
    }

    pub fn push(&mut self, image: PendingImage) {
        self.pending.push_back(image);
    }

    /// Head image, if a frame may be dispatched right now.
    pub fn ready_head(&self) -> Option<&PendingImage> {
        if self.capacity == 0 {
            return None;
        }
        self.pending.front()
    }

    /// Consume one unit of capacity and one frame of the head image, advancing the clock.
    pub fn commit_frame(&mut self) -> Option<PacedFrame> {
        if self.capacity == 0 {
            return None;
        }
        let head = self.pending.front_mut()?;
        head.frames_remaining = head.frames_remaining.saturating_sub(1);
        self.capacity -= 1;

        let presentation_time_us = self.presentation_time_us;
        self.presentation_time_us = self
            .presentation_time_us
            .saturating_add(head.frame_duration_us);

        let image_finished = head.frames_remaining == 0;
        if image_finished {
            self.pending.pop_front();
        }
        Some(PacedFrame {
            presentation_time_us,
            image_finished,
        })
    }

    /// No image has frames left to send.
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn presentation_time_us(&self) -> u64 {
        self.presentation_time_us
    }

    pub fn pending_images(&self) -> usize {
        self.pending.len()
    }
}
