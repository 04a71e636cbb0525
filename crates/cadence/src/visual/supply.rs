//! Feeds frames made from still images to a downstream consumer, never ahead of the
//! capacity it has granted.

use crossbeam_channel::Receiver;

use super::pacer::{FramePacer, FramePlan, PendingImage};
use crate::error::PipelineError;
use crate::gpu::texture::{TextureAllocator, TextureCache};
use crate::media::types::{ImageFrame, TextureInfo};
use crate::worker::{PipelineWorker, Submitter};

/// Downstream stage that receives frames (a shader/render stage).
pub trait FrameConsumer: Send {
    fn queue_input_frame(&mut self, texture: TextureInfo, presentation_time_us: u64);

    fn signal_end_of_current_input_stream(&mut self);
}

/// Lifecycle of the frame supply.
///
/// | state       | queue image | ready grant      | end of input          |
/// |-------------|-------------|------------------|-----------------------|
/// | Streaming   | enqueued    | dispatch         | -> InputClosed        |
/// | InputClosed | dropped     | dispatch         | no-op                 |
/// | Drained     | dropped     | counted only     | no-op                 |
/// | Failed      | dropped     | counted only     | no-op                 |
///
/// `InputClosed -> Drained` happens when the last pending frame is dispatched (or
/// immediately if nothing is pending) and is when end-of-stream goes downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyState {
    Streaming,
    InputClosed,
    Drained,
    Failed,
}

impl SupplyState {
    pub fn input_ended(self) -> bool {
        !matches!(self, Self::Streaming)
    }

    pub fn output_ended(self) -> bool {
        matches!(self, Self::Drained)
    }
}

/// Worker-side state of the frame supply pipeline.
pub struct ImageFrameSupply<A: TextureAllocator, C: FrameConsumer> {
    textures: TextureCache<A>,
    pacer: FramePacer,
    consumer: C,
    state: SupplyState,
    use_hdr: bool,
    frames_dispatched: u64,
}

impl<A: TextureAllocator, C: FrameConsumer> ImageFrameSupply<A, C> {
    pub fn new(allocator: A, consumer: C) -> Self {
        Self {
            textures: TextureCache::new(allocator),
            pacer: FramePacer::new(),
            consumer,
            state: SupplyState::Streaming,
            use_hdr: false,
            frames_dispatched: 0,
        }
    }

    pub fn on_ready_to_accept_input_frame(&mut self) -> Result<(), PipelineError> {
        self.pacer.grant_capacity();
        self.maybe_queue_to_consumer()
    }

    pub fn queue_input_image(
        &mut self,
        image: ImageFrame,
        duration_us: u64,
        frame_rate: f32,
        use_hdr: bool,
    ) -> Result<(), PipelineError> {
        self.use_hdr = use_hdr;
        if self.state != SupplyState::Streaming {
            log::warn!(
                "Dropping {}x{} image queued after end of input",
                image.width,
                image.height
            );
            return Ok(());
        }

        let plan = match FramePlan::compute(duration_us, frame_rate) {
            Some(plan) if plan.frame_count > 0 => plan,
            _ => {
                log::warn!(
                    "Dropping image with no frames (duration {duration_us}us at {frame_rate}fps)"
                );
                return Ok(());
            }
        };
        log::debug!(
            "Queued {}x{} image: {} frames, {}us apart",
            image.width,
            image.height,
            plan.frame_count,
            plan.frame_duration_us
        );
        self.pacer.push(PendingImage::new(image, plan));
        self.maybe_queue_to_consumer()
    }

    pub fn signal_end_of_input(&mut self) {
        if self.state == SupplyState::Streaming {
            self.state = SupplyState::InputClosed;
        }
        self.maybe_signal_end_of_output();
    }

    /// Dispatch at most one frame, if capacity and a pending image both exist.
    fn maybe_queue_to_consumer(&mut self) -> Result<(), PipelineError> {
        if matches!(self.state, SupplyState::Drained | SupplyState::Failed) {
            return Ok(());
        }
        let Some(head) = self.pacer.ready_head() else {
            return Ok(());
        };

        if head.is_untouched() {
            let image = head.image.clone();
            if let Err(e) = self.textures.replace_texture(&image, self.use_hdr) {
                self.state = SupplyState::Failed;
                return Err(e.into());
            }
        }
        let Some(texture) = self.textures.current() else {
            return Ok(());
        };
        let Some(frame) = self.pacer.commit_frame() else {
            return Ok(());
        };

        self.consumer
            .queue_input_frame(texture, frame.presentation_time_us);
        self.frames_dispatched += 1;

        if frame.image_finished {
            self.maybe_signal_end_of_output();
        }
        Ok(())
    }

    fn maybe_signal_end_of_output(&mut self) {
        if self.state == SupplyState::InputClosed && self.pacer.is_drained() {
            self.consumer.signal_end_of_current_input_stream();
            self.state = SupplyState::Drained;
            log::info!(
                "Frame supply drained after {} frames",
                self.frames_dispatched
            );
        }
    }

    pub fn state(&self) -> SupplyState {
        self.state
    }

    pub fn frames_dispatched(&self) -> u64 {
        self.frames_dispatched
    }

    pub fn capacity(&self) -> u32 {
        self.pacer.capacity()
    }

    pub fn presentation_time_us(&self) -> u64 {
        self.pacer.presentation_time_us()
    }

    pub fn current_texture(&self) -> Option<TextureInfo> {
        self.textures.current()
    }
}

/// Snapshot of supply counters, read through the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupplyStatus {
    pub state: SupplyState,
    pub frames_dispatched: u64,
    pub capacity: u32,
    pub presentation_time_us: u64,
    /// The live texture, if any image has been dispatched.
    pub texture: Option<TextureInfo>,
}

/// Grants one unit of downstream capacity. Cloneable; usable from any thread,
/// including from inside `FrameConsumer` callbacks.
pub struct ReadySignal<A: TextureAllocator, C: FrameConsumer> {
    submitter: Submitter<ImageFrameSupply<A, C>>,
}

impl<A: TextureAllocator, C: FrameConsumer> Clone for ReadySignal<A, C> {
    fn clone(&self) -> Self {
        Self {
            submitter: self.submitter.clone(),
        }
    }
}

impl<A: TextureAllocator + 'static, C: FrameConsumer + 'static> ReadySignal<A, C> {
    pub fn notify(&self) -> Result<(), PipelineError> {
        self.submitter
            .submit(ImageFrameSupply::on_ready_to_accept_input_frame)
    }
}

/// Thread-safe front end of the frame supply pipeline. Every method enqueues a task on
/// the pipeline worker and returns without waiting, except the status queries.
pub struct ImageFrameSupplyHandle<A: TextureAllocator, C: FrameConsumer> {
    worker: PipelineWorker<ImageFrameSupply<A, C>>,
}

impl<A: TextureAllocator + 'static, C: FrameConsumer + 'static> ImageFrameSupplyHandle<A, C> {
    pub fn spawn(allocator: A, consumer: C, queue_capacity: usize) -> std::io::Result<Self> {
        let worker = PipelineWorker::spawn(
            "frame-supply",
            ImageFrameSupply::new(allocator, consumer),
            queue_capacity,
        )?;
        Ok(Self { worker })
    }

    /// Downstream can accept one more frame.
    pub fn notify_downstream_ready(&self) -> Result<(), PipelineError> {
        self.worker
            .submit(ImageFrameSupply::on_ready_to_accept_input_frame)
    }

    pub fn ready_signal(&self) -> ReadySignal<A, C> {
        ReadySignal {
            submitter: self.worker.submitter(),
        }
    }

    pub fn queue_input_image(
        &self,
        image: ImageFrame,
        duration_us: u64,
        frame_rate: f32,
        use_hdr: bool,
    ) -> Result<(), PipelineError> {
        self.worker.submit(move |supply| {
            supply.queue_input_image(image, duration_us, frame_rate, use_hdr)
        })
    }

    pub fn signal_end_of_input(&self) -> Result<(), PipelineError> {
        self.worker.submit(|supply| {
            supply.signal_end_of_input();
            Ok(())
        })
    }

    /// Waits for queued tasks, then reports the pipeline's counters.
    pub fn status(&self) -> Result<SupplyStatus, PipelineError> {
        self.worker.call(|supply| SupplyStatus {
            state: supply.state(),
            frames_dispatched: supply.frames_dispatched(),
            capacity: supply.capacity(),
            presentation_time_us: supply.presentation_time_us(),
            texture: supply.current_texture(),
        })
    }

    /// Run a read-only query against the worker-side state.
    pub fn inspect<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&ImageFrameSupply<A, C>) -> T + Send + 'static,
    {
        self.worker.call(move |supply| f(supply))
    }

    pub fn sync(&self) -> Result<(), PipelineError> {
        self.worker.sync()
    }

    /// Fatal errors (texture allocation/upload failures).
    pub fn errors(&self) -> &Receiver<PipelineError> {
        self.worker.errors()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::gpu::texture::testing::{AllocEvent, FakeAllocator};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Delivered {
        Frame(TextureInfo, u64),
        EndOfStream,
    }

    #[derive(Clone, Default)]
    struct RecordingConsumer {
        delivered: Arc<Mutex<Vec<Delivered>>>,
    }

    impl RecordingConsumer {
        fn frames(&self) -> Vec<(TextureInfo, u64)> {
            self.delivered
                .lock()
                .unwrap()
                .iter()
                .filter_map(|d| match d {
                    Delivered::Frame(t, pts) => Some((*t, *pts)),
                    Delivered::EndOfStream => None,
                })
                .collect()
        }

        fn times(&self) -> Vec<u64> {
            self.frames().into_iter().map(|(_, pts)| pts).collect()
        }

        fn end_of_stream_count(&self) -> usize {
            self.delivered
                .lock()
                .unwrap()
                .iter()
                .filter(|d| **d == Delivered::EndOfStream)
                .count()
        }
    }

    impl FrameConsumer for RecordingConsumer {
        fn queue_input_frame(&mut self, texture: TextureInfo, presentation_time_us: u64) {
            self.delivered
                .lock()
                .unwrap()
                .push(Delivered::Frame(texture, presentation_time_us));
        }

        fn signal_end_of_current_input_stream(&mut self) {
            self.delivered.lock().unwrap().push(Delivered::EndOfStream);
        }
    }

    fn supply() -> (
        ImageFrameSupply<FakeAllocator, RecordingConsumer>,
        FakeAllocator,
        RecordingConsumer,
    ) {
        let alloc = FakeAllocator::default();
        let consumer = RecordingConsumer::default();
        (
            ImageFrameSupply::new(alloc.clone(), consumer.clone()),
            alloc,
            consumer,
        )
    }

    fn image() -> ImageFrame {
        ImageFrame::solid(2, 2, [9, 9, 9, 255])
    }

    #[test]
    fn two_frames_then_spare_capacity_then_end_of_output() {
        let (mut s, _, consumer) = supply();
        s.queue_input_image(image(), 1_000_000, 2.0, false).unwrap();
        for _ in 0..3 {
            s.on_ready_to_accept_input_frame().unwrap();
        }

        assert_eq!(consumer.times(), vec![0, 500_000]);
        assert_eq!(s.capacity(), 1);
        assert_eq!(consumer.end_of_stream_count(), 0);

        s.signal_end_of_input();
        assert_eq!(consumer.end_of_stream_count(), 1);
        assert_eq!(s.state(), SupplyState::Drained);
    }

    #[test]
    fn one_frame_per_grant() {
        let (mut s, _, consumer) = supply();
        s.queue_input_image(image(), 1_000_000, 10.0, false).unwrap();
        assert!(consumer.frames().is_empty());
        for granted in 1..=4 {
            s.on_ready_to_accept_input_frame().unwrap();
            assert_eq!(consumer.frames().len(), granted);
        }
        assert_eq!(s.capacity(), 0);
    }

    #[test]
    fn capacity_granted_before_images_is_used_on_submission() {
        let (mut s, _, consumer) = supply();
        s.on_ready_to_accept_input_frame().unwrap();
        s.on_ready_to_accept_input_frame().unwrap();
        assert!(consumer.frames().is_empty());

        // Each submission dispatches a single frame, not a drain.
        s.queue_input_image(image(), 1_000_000, 5.0, false).unwrap();
        assert_eq!(consumer.frames().len(), 1);
        assert_eq!(s.capacity(), 1);
    }

    #[test]
    fn image_frames_complete_before_next_image_starts() {
        let (mut s, alloc, consumer) = supply();
        s.queue_input_image(image(), 1_000_000, 3.0, false).unwrap();
        s.queue_input_image(ImageFrame::solid(4, 4, [0; 4]), 500_000, 4.0, false)
            .unwrap();
        for _ in 0..5 {
            s.on_ready_to_accept_input_frame().unwrap();
        }

        let frames = consumer.frames();
        assert_eq!(frames.len(), 5);
        let first_tex = frames[0].0;
        let second_tex = frames[3].0;
        assert!(frames[..3].iter().all(|(t, _)| *t == first_tex));
        assert!(frames[3..].iter().all(|(t, _)| *t == second_tex));
        assert_ne!(first_tex.id, second_tex.id);
        assert_eq!((second_tex.width, second_tex.height), (4, 4));
        assert_eq!(
            consumer.times(),
            vec![0, 333_333, 666_666, 999_999, 1_249_999]
        );

        // Old texture deleted only when the second image became current.
        assert_eq!(alloc.max_live(), 1);
        let events = alloc.events();
        let delete_pos = events
            .iter()
            .position(|e| *e == AllocEvent::Delete(first_tex.id))
            .unwrap();
        let create_pos = events
            .iter()
            .position(|e| matches!(e, AllocEvent::Create(id, ..) if *id == second_tex.id))
            .unwrap();
        assert!(delete_pos < create_pos);
    }

    #[test]
    fn texture_reused_across_frames_of_one_image() {
        let (mut s, alloc, _) = supply();
        s.queue_input_image(image(), 2_000_000, 30.0, false).unwrap();
        for _ in 0..60 {
            s.on_ready_to_accept_input_frame().unwrap();
        }
        let creates = alloc
            .events()
            .iter()
            .filter(|e| matches!(e, AllocEvent::Create(..)))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn end_of_output_waits_for_pending_frames() {
        let (mut s, _, consumer) = supply();
        s.queue_input_image(image(), 1_000_000, 2.0, false).unwrap();
        s.signal_end_of_input();
        assert_eq!(s.state(), SupplyState::InputClosed);
        assert_eq!(consumer.end_of_stream_count(), 0);

        s.on_ready_to_accept_input_frame().unwrap();
        assert_eq!(consumer.end_of_stream_count(), 0);
        s.on_ready_to_accept_input_frame().unwrap();
        assert_eq!(consumer.end_of_stream_count(), 1);

        // Further grants and end-of-input signals do not re-signal.
        s.on_ready_to_accept_input_frame().unwrap();
        s.signal_end_of_input();
        assert_eq!(consumer.end_of_stream_count(), 1);
    }

    #[test]
    fn images_after_end_of_input_are_dropped() {
        let (mut s, alloc, consumer) = supply();
        s.signal_end_of_input();
        s.queue_input_image(image(), 1_000_000, 2.0, true).unwrap();
        s.on_ready_to_accept_input_frame().unwrap();
        assert!(consumer.frames().is_empty());
        assert!(alloc.events().is_empty());
        assert_eq!(consumer.end_of_stream_count(), 1);
    }

    #[test]
    fn zero_frame_image_is_dropped() {
        let (mut s, alloc, consumer) = supply();
        s.on_ready_to_accept_input_frame().unwrap();
        s.queue_input_image(image(), 100_000, 2.0, false).unwrap();
        s.queue_input_image(image(), 1_000_000, 0.0, false).unwrap();
        assert!(consumer.frames().is_empty());
        assert!(alloc.events().is_empty());
        assert_eq!(s.presentation_time_us(), 0);

        s.signal_end_of_input();
        assert_eq!(consumer.end_of_stream_count(), 1);
    }

    #[test]
    fn hdr_flag_reaches_allocator() {
        let (mut s, alloc, _) = supply();
        s.on_ready_to_accept_input_frame().unwrap();
        s.queue_input_image(image(), 1_000_000, 1.0, true).unwrap();
        assert!(matches!(
            alloc.events()[0],
            AllocEvent::Create(_, 2, 2, true)
        ));
    }

    #[test]
    fn upload_failure_is_fatal_and_halts() {
        let consumer = RecordingConsumer::default();
        let mut s = ImageFrameSupply::new(FakeAllocator::failing_upload(), consumer.clone());
        s.queue_input_image(image(), 1_000_000, 2.0, false).unwrap();
        let err = s.on_ready_to_accept_input_frame().unwrap_err();
        assert!(matches!(err, PipelineError::FrameProcessing(_)));
        assert_eq!(s.state(), SupplyState::Failed);

        s.on_ready_to_accept_input_frame().unwrap();
        s.signal_end_of_input();
        assert!(consumer.frames().is_empty());
        assert_eq!(consumer.end_of_stream_count(), 0);
    }

    #[test]
    fn state_flags() {
        assert!(!SupplyState::Streaming.input_ended());
        assert!(SupplyState::InputClosed.input_ended());
        assert!(!SupplyState::InputClosed.output_ended());
        assert!(SupplyState::Drained.output_ended());
    }

    // ---- Worker-backed handle ----

    #[test]
    fn handle_serializes_calls_from_many_threads() {
        let consumer = RecordingConsumer::default();
        let handle = Arc::new(
            ImageFrameSupplyHandle::spawn(FakeAllocator::default(), consumer.clone(), 0)
                .unwrap(),
        );
        handle.queue_input_image(image(), 1_000_000, 20.0, false).unwrap();

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let h = handle.clone();
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        h.notify_downstream_ready().unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        handle.signal_end_of_input().unwrap();

        let status = handle.status().unwrap();
        assert_eq!(status.frames_dispatched, 20);
        assert_eq!(status.capacity, 0);
        assert_eq!(status.state, SupplyState::Drained);
        assert_eq!(status.presentation_time_us, 1_000_000);
        let texture = status.texture.unwrap();
        assert_eq!((texture.width, texture.height), (image().width, image().height));

        let times = consumer.times();
        assert!(times.windows(2).all(|w| w[1] - w[0] == 50_000));
        assert_eq!(consumer.end_of_stream_count(), 1);
    }

    #[test]
    fn handle_reports_fatal_errors() {
        let handle = ImageFrameSupplyHandle::spawn(
            FakeAllocator::failing_upload(),
            RecordingConsumer::default(),
            0,
        )
        .unwrap();
        handle.notify_downstream_ready().unwrap();
        handle.queue_input_image(image(), 1_000_000, 2.0, false).unwrap();
        handle.sync().unwrap();
        assert!(matches!(
            handle.errors().try_recv(),
            Ok(PipelineError::FrameProcessing(_))
        ));
        assert_eq!(handle.status().unwrap().state, SupplyState::Failed);
    }

    /// Consumer that immediately asks for the next frame, like a render stage with a
    /// one-frame input slot.
    struct PullingConsumer {
        inner: RecordingConsumer,
        ready: Arc<Mutex<Option<ReadySignal<FakeAllocator, PullingConsumer>>>>,
    }

    impl FrameConsumer for PullingConsumer {
        fn queue_input_frame(&mut self, texture: TextureInfo, presentation_time_us: u64) {
            self.inner.queue_input_frame(texture, presentation_time_us);
            if let Some(ready) = self.ready.lock().unwrap().as_ref() {
                ready.notify().unwrap();
            }
        }

        fn signal_end_of_current_input_stream(&mut self) {
            self.inner.signal_end_of_current_input_stream();
        }
    }

    #[test]
    fn consumer_can_pull_through_ready_signal() {
        let recorder = RecordingConsumer::default();
        let ready = Arc::new(Mutex::new(None));
        let handle = ImageFrameSupplyHandle::spawn(
            FakeAllocator::default(),
            PullingConsumer {
                inner: recorder.clone(),
                ready: ready.clone(),
            },
            0,
        )
        .unwrap();
        *ready.lock().unwrap() = Some(handle.ready_signal());

        handle.queue_input_image(image(), 1_000_000, 4.0, false).unwrap();
        handle.signal_end_of_input().unwrap();
        handle.notify_downstream_ready().unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while recorder.end_of_stream_count() == 0 && std::time::Instant::now() < deadline {
            handle.sync().unwrap();
        }
        assert_eq!(recorder.times(), vec![0, 250_000, 500_000, 750_000]);
        assert_eq!(recorder.end_of_stream_count(), 1);
    }
}
