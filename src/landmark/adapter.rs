use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::slot::{LatestSlot, SlotRecv};
use super::{DetectionEvent, LandmarkEngine, LandmarkFrame};
use crate::error::{ErrorKind, TryOnError, TryOnResult};
use crate::frame::VideoFrame;

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// How long the worker waits for a frame before re-checking shutdown.
    pub idle_poll: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_millis(50),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub submitted: u64,
    /// Frames replaced in the input slot before the worker reached them.
    pub dropped: u64,
    pub processed: u64,
    pub detections: u64,
    pub misses: u64,
    pub engine_errors: u64,
    /// Frames discarded for not being newer than the last emitted one.
    pub stale: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    detections: AtomicU64,
    misses: AtomicU64,
    engine_errors: AtomicU64,
    stale: AtomicU64,
}

#[derive(Clone)]
pub struct FrameSubmitter {
    input: Arc<LatestSlot<VideoFrame>>,
    counters: Arc<Counters>,
    shutdown: Arc<AtomicBool>,
}

impl FrameSubmitter {
    pub fn submit(&self, frame: VideoFrame) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if self.input.put(frame) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Runs a landmark engine on a worker thread.
///
/// Input is a latest-frame-wins slot, so a slow engine never queues frames;
/// output is a capacity-1 slot of `DetectionEvent`s whose `captured_at`
/// strictly increases.
pub struct DetectorAdapter {
    engine_name: &'static str,
    input: Arc<LatestSlot<VideoFrame>>,
    output: Arc<LatestSlot<DetectionEvent>>,
    counters: Arc<Counters>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DetectorAdapter {
    /// Warm up `engine` and start the worker. Warm-up failures are reported
    /// as `LandmarkEngineInitFailed`.
    pub fn initialize(
        mut engine: Box<dyn LandmarkEngine>,
        config: DetectorConfig,
    ) -> TryOnResult<Self> {
        let engine_name = engine.name();
        engine.warm_up().map_err(|err| {
            log::warn!("DetectorAdapter: engine {} failed warm-up: {:#}", engine_name, err);
            TryOnError::new(
                ErrorKind::LandmarkEngineInitFailed,
                format!("{} warm-up: {:#}", engine_name, err),
            )
        })?;

        let input = Arc::new(LatestSlot::new());
        let output = Arc::new(LatestSlot::new());
        let counters = Arc::new(Counters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let input = input.clone();
            let output = output.clone();
            let counters = counters.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("tryon-detector".to_string())
                .spawn(move || {
                    run_worker(engine, &input, &output, &counters, &shutdown, config.idle_poll)
                })
                .map_err(|e| {
                    TryOnError::new(
                        ErrorKind::LandmarkEngineInitFailed,
                        format!("failed to spawn detector worker: {}", e),
                    )
                })?
        };

        log::info!("DetectorAdapter: engine {} ready", engine_name);
        Ok(Self {
            engine_name,
            input,
            output,
            counters,
            shutdown,
            worker: Some(worker),
        })
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine_name
    }

    /// Hand a frame to the worker without blocking. An older frame still
    /// waiting in the slot is discarded.
    pub fn submit(&self, frame: VideoFrame) {
        self.submitter().submit(frame);
    }

    /// Cloneable submit handle for the capture thread.
    pub fn submitter(&self) -> FrameSubmitter {
        FrameSubmitter {
            input: self.input.clone(),
            counters: self.counters.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// The output slot. Closed when the adapter shuts down.
    pub fn events(&self) -> Arc<LatestSlot<DetectionEvent>> {
        self.output.clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn stats(&self) -> DetectorStats {
        let c = &self.counters;
        DetectorStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            detections: c.detections.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            engine_errors: c.engine_errors.load(Ordering::Relaxed),
            stale: c.stale.load(Ordering::Relaxed),
        }
    }

    /// Stop the worker and close both slots. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.input.close();
        self.output.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("DetectorAdapter: worker thread panicked");
            }
            let stats = self.stats();
            log::info!(
                "DetectorAdapter: stopped ({} processed, {} dropped, {} detections)",
                stats.processed,
                stats.dropped,
                stats.detections
            );
        }
    }
}

impl Drop for DetectorAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    mut engine: Box<dyn LandmarkEngine>,
    input: &LatestSlot<VideoFrame>,
    output: &LatestSlot<DetectionEvent>,
    counters: &Counters,
    shutdown: &AtomicBool,
    idle_poll: Duration,
) {
    let mut last_emitted: Option<Instant> = None;
    while !shutdown.load(Ordering::SeqCst) {
        let frame = match input.recv_timeout(idle_poll) {
            SlotRecv::Value(frame) => frame,
            SlotRecv::Timeout => continue,
            SlotRecv::Closed => break,
        };
        if last_emitted.is_some_and(|last| frame.captured_at <= last) {
            counters.stale.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        counters.processed.fetch_add(1, Ordering::Relaxed);
        let event = match engine.estimate(&frame) {
            Ok(Some(estimate)) => {
                counters.detections.fetch_add(1, Ordering::Relaxed);
                DetectionEvent::Landmarks(LandmarkFrame::new(
                    estimate.points,
                    estimate.confidence,
                    frame.captured_at,
                ))
            }
            Ok(None) => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
                DetectionEvent::NoLandmarks {
                    captured_at: frame.captured_at,
                }
            }
            Err(err) => {
                counters.engine_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "DetectorAdapter: {} failed on frame {}: {:#}",
                    engine.name(),
                    frame.sequence,
                    err
                );
                DetectionEvent::NoLandmarks {
                    captured_at: frame.captured_at,
                }
            }
        };
        last_emitted = Some(frame.captured_at);
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        output.put(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameStamper, PixelFormat};
    use crate::landmark::{ScriptStep, ScriptedEngine};

    fn frame_at(sequence: u64, captured_at: Instant) -> VideoFrame {
        VideoFrame::new(vec![0; 12], 2, 2, PixelFormat::Rgb24, sequence, captured_at)
    }

    fn recv(adapter: &DetectorAdapter) -> DetectionEvent {
        match adapter.events().recv_timeout(Duration::from_secs(2)) {
            SlotRecv::Value(event) => event,
            other => panic!("expected an event, got {:?}", other),
        }
    }

    #[test]
    fn warm_up_failure_is_init_failed() {
        let engine = ScriptedEngine::from_steps(vec![]).failing_warm_up("weights missing");
        let err = DetectorAdapter::initialize(Box::new(engine), DetectorConfig::default())
            .err()
            .expect("warm-up must fail");
        assert_eq!(err.kind, ErrorKind::LandmarkEngineInitFailed);
        assert!(err.message.contains("weights missing"));
    }

    #[test]
    fn emits_landmarks_with_frame_timestamp() {
        let engine = ScriptedEngine::from_steps(vec![ScriptStep::hand(0.5, 0.5, 0.9)]);
        let adapter =
            DetectorAdapter::initialize(Box::new(engine), DetectorConfig::default()).unwrap();
        let at = Instant::now();
        adapter.submit(frame_at(1, at));
        match recv(&adapter) {
            DetectionEvent::Landmarks(frame) => {
                assert_eq!(frame.captured_at(), at);
                assert_eq!(frame.confidence(), 0.9);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn engine_errors_become_no_landmarks() {
        let engine = ScriptedEngine::from_steps(vec![ScriptStep::Fail]);
        let adapter =
            DetectorAdapter::initialize(Box::new(engine), DetectorConfig::default()).unwrap();
        adapter.submit(frame_at(1, Instant::now()));
        assert!(matches!(recv(&adapter), DetectionEvent::NoLandmarks { .. }));
        assert_eq!(adapter.stats().engine_errors, 1);
    }

    #[test]
    fn older_frames_are_discarded() {
        let engine = ScriptedEngine::from_steps(vec![ScriptStep::hand(0.5, 0.5, 0.9)]);
        let adapter =
            DetectorAdapter::initialize(Box::new(engine), DetectorConfig::default()).unwrap();
        let mut stamper = FrameStamper::new();
        let early = stamper.stamp();
        let late = stamper.stamp();

        adapter.submit(frame_at(2, late));
        assert_eq!(recv(&adapter).captured_at(), late);
        adapter.submit(frame_at(1, early));

        let deadline = Instant::now() + Duration::from_secs(2);
        while adapter.stats().stale == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(adapter.stats().stale, 1);
        assert!(adapter.events().take().is_none());
    }

    #[test]
    fn slow_engine_drops_intermediate_frames() {
        let engine = ScriptedEngine::from_steps(vec![ScriptStep::hand(0.5, 0.5, 0.9)])
            .with_latency(Duration::from_millis(40));
        let adapter =
            DetectorAdapter::initialize(Box::new(engine), DetectorConfig::default()).unwrap();
        let mut stamper = FrameStamper::new();
        for seq in 1..=20 {
            adapter.submit(frame_at(seq, stamper.stamp()));
            std::thread::sleep(Duration::from_millis(2));
        }
        std::thread::sleep(Duration::from_millis(100));
        let stats = adapter.stats();
        assert_eq!(stats.submitted, 20);
        assert!(stats.dropped > 0);
        assert!(stats.processed < 20);
    }

    #[test]
    fn shutdown_is_idempotent_and_closes_events() {
        let engine = ScriptedEngine::from_steps(vec![ScriptStep::Miss]);
        let mut adapter =
            DetectorAdapter::initialize(Box::new(engine), DetectorConfig::default()).unwrap();
        let events = adapter.events();
        adapter.shutdown();
        adapter.shutdown();
        assert!(!adapter.is_running());
        assert!(events.is_closed());
        adapter.submit(frame_at(1, Instant::now()));
        assert_eq!(adapter.stats().submitted, 0);
    }
}
