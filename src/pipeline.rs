//! The frame-at-a-time processing loop.
//!
//! Per frame: buffer it, detect, pick one person, classify posture, run the
//! edge-triggered fall check, gate through the cooldown, and hand accepted
//! alerts to an `AlertSink`. Everything the loop mutates lives in
//! `FallPipeline`.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::cooldown::{CooldownGate, GateDecision, DEFAULT_COOLDOWN};
use crate::detect::{person_count, LargestPersonSelector, PersonDetector, PersonSelector};
use crate::dispatch::{AlertSink, FallAlert, DEFAULT_DESCRIPTION, DEFAULT_LOCATION};
use crate::fall::{FallStateMachine, MissPolicy, Transition};
use crate::frame::{buffer_capacity, Frame, FrameBuffer, DEFAULT_LEAD_UP, DEFAULT_LIVE_BUFFER_FRAMES};
use crate::ingest::{FrameSource, SourceKind};
use crate::posture::{PersonState, DEFAULT_RATIO_THRESHOLD};

const DEBUG_DETECTION_FRAMES: u64 = 5;
const DEBUG_POSTURE_FRAMES: u64 = 20;
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
/// Pacing rate for recordings that do not report one.
pub const FALLBACK_FILE_FPS: f64 = 30.0;

/// Tunables for the loop.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub ratio_threshold: f64,
    pub cooldown: Duration,
    pub lead_up: Duration,
    pub live_buffer_frames: usize,
    pub miss_policy: MissPolicy,
    pub location: String,
    pub description: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ratio_threshold: DEFAULT_RATIO_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            lead_up: DEFAULT_LEAD_UP,
            live_buffer_frames: DEFAULT_LIVE_BUFFER_FRAMES,
            miss_policy: MissPolicy::Freeze,
            location: DEFAULT_LOCATION.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }
}

/// Counters for throttled diagnostics and the final summary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopCounters {
    pub frames: u64,
    pub person_frames: u64,
    pub detector_errors: u64,
    pub alerts: u64,
    pub suppressed: u64,
}

/// What happened to one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    NoPerson,
    Observed(Transition),
    Alerted(Transition),
    Suppressed { transition: Transition, remaining: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Stop flag set (Ctrl-C).
    Signal,
    EndOfStream,
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub reason: StopReason,
    pub counters: LoopCounters,
}

pub struct FallPipeline {
    settings: PipelineSettings,
    machine: FallStateMachine,
    gate: CooldownGate,
    buffer: FrameBuffer,
    selector: Box<dyn PersonSelector>,
    counters: LoopCounters,
}

impl FallPipeline {
    pub fn new(settings: PipelineSettings, buffer_frames: usize) -> Self {
        Self {
            machine: FallStateMachine::new(settings.miss_policy),
            gate: CooldownGate::new(settings.cooldown),
            buffer: FrameBuffer::new(buffer_frames),
            selector: Box::new(LargestPersonSelector::new()),
            counters: LoopCounters::default(),
            settings,
        }
    }

    /// Size the buffer from the source: `fps * lead_up` for recordings with a
    /// known rate, the live default otherwise.
    pub fn for_source(settings: PipelineSettings, source: &dyn FrameSource) -> Self {
        let fps = match source.kind() {
            SourceKind::File => source.nominal_fps(),
            SourceKind::Live => None,
        };
        let capacity = buffer_capacity(fps, settings.lead_up, settings.live_buffer_frames);
        Self::new(settings, capacity)
    }

    pub fn with_selector(mut self, selector: Box<dyn PersonSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn counters(&self) -> &LoopCounters {
        &self.counters
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one frame through the pipeline. Detector errors count as "no person".
    pub fn process_frame(
        &mut self,
        frame: Frame,
        detector: &mut dyn PersonDetector,
        sink: &mut dyn AlertSink,
        now: Instant,
    ) -> FrameOutcome {
        self.counters.frames += 1;
        self.buffer.push(frame);
        let Some(current) = self.buffer.latest() else {
            return FrameOutcome::NoPerson;
        };

        let detections = match detector.detect(current.image()) {
            Ok(detections) => detections,
            Err(err) => {
                self.counters.detector_errors += 1;
                log::warn!("detector {} failed on frame {}: {:#}", detector.name(), current.index, err);
                Vec::new()
            }
        };
        if self.counters.frames <= DEBUG_DETECTION_FRAMES {
            log::info!(
                "frame {}: {} detections, {} persons",
                current.index,
                detections.len(),
                person_count(&detections)
            );
        }

        let Some(bbox) = self.selector.select(&detections) else {
            self.machine.observe_miss();
            log::debug!("frame {}: no person", current.index);
            return FrameOutcome::NoPerson;
        };

        let state = PersonState::classify(bbox, self.settings.ratio_threshold);
        self.counters.person_frames += 1;
        let transition = self.machine.observe(state);
        if self.counters.person_frames <= DEBUG_POSTURE_FRAMES || transition.posture_changed() {
            log::info!(
                "frame {}: {} (box {}x{}, prev {})",
                current.index,
                state.label(),
                bbox.width(),
                bbox.height(),
                transition.previous.map(|p| p.label()).unwrap_or("none")
            );
        } else {
            log::debug!("frame {}: {}", current.index, state.label());
        }

        if !transition.fall_detected {
            return FrameOutcome::Observed(transition);
        }

        match self.gate.check(now) {
            GateDecision::Suppress { remaining } => {
                self.counters.suppressed += 1;
                log::info!(
                    "fall detected but suppressed by cooldown ({:.1}s remaining)",
                    remaining.as_secs_f64()
                );
                FrameOutcome::Suppressed {
                    transition,
                    remaining,
                }
            }
            GateDecision::Accept => {
                let alert = FallAlert {
                    frame: current.clone(),
                    lead_up_frames: self.buffer.snapshot_excluding_last(),
                    timestamp: current.captured_at,
                    location: self.settings.location.clone(),
                    description: self.settings.description.clone(),
                };
                log::warn!(
                    "FALL DETECTED at frame {} ({} lead-up frames, location {})",
                    alert.frame.index,
                    alert.lead_up_frames.len(),
                    alert.location
                );
                sink.submit(alert);
                self.gate.record(now);
                self.counters.alerts += 1;
                FrameOutcome::Alerted(transition)
            }
        }
    }

    /// Drive the loop until `stop` is set or the source ends.
    ///
    /// The source is released on every exit path, including errors.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn PersonDetector,
        sink: &mut dyn AlertSink,
        stop: &AtomicBool,
    ) -> Result<RunSummary> {
        let result = self.run_until_stopped(source, detector, sink, stop);
        source.release();
        let reason = result?;
        log::info!(
            "loop finished ({:?}): {} frames, {} with a person, {} alerts, {} suppressed",
            reason,
            self.counters.frames,
            self.counters.person_frames,
            self.counters.alerts,
            self.counters.suppressed
        );
        Ok(RunSummary {
            reason,
            counters: self.counters.clone(),
        })
    }

    fn run_until_stopped(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn PersonDetector,
        sink: &mut dyn AlertSink,
        stop: &AtomicBool,
    ) -> Result<StopReason> {
        let pace = match source.kind() {
            SourceKind::File => {
                let fps = source
                    .nominal_fps()
                    .filter(|fps| fps.is_finite() && *fps > 0.0)
                    .unwrap_or(FALLBACK_FILE_FPS);
                Some(Duration::from_secs_f64(1.0 / fps))
            }
            SourceKind::Live => None,
        };
        log::info!(
            "processing loop started: buffer {} frames, cooldown {:.1}s, threshold {}",
            self.buffer.capacity(),
            self.settings.cooldown.as_secs_f64(),
            self.settings.ratio_threshold
        );

        let mut last_health_log = Instant::now();
        while !stop.load(Ordering::SeqCst) {
            let started = Instant::now();
            let Some(frame) = source.next_frame()? else {
                log::info!("end of stream");
                return Ok(StopReason::EndOfStream);
            };
            self.process_frame(frame, detector, sink, Instant::now());

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = source.stats();
                log::info!(
                    "source health={} frames={} source={}",
                    source.is_healthy(),
                    stats.frames_captured,
                    stats.source
                );
                log::debug!(
                    "frame buffer: {} frames, ~{} KB",
                    self.buffer.len(),
                    self.buffer.memory_bytes() / 1024
                );
                last_health_log = Instant::now();
            }

            if let Some(interval) = pace {
                let spent = started.elapsed();
                if spent < interval {
                    std::thread::sleep(interval - spent);
                }
            }
        }
        log::info!("stop requested");
        Ok(StopReason::Signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedBackend;
    use crate::posture::BoundingBox;
    use image::RgbImage;

    #[derive(Default)]
    struct CollectingSink {
        alerts: Vec<FallAlert>,
    }

    impl AlertSink for CollectingSink {
        fn submit(&mut self, alert: FallAlert) {
            self.alerts.push(alert);
        }
    }

    const STANDING: BoundingBox = BoundingBox {
        x1: 0,
        y1: 0,
        x2: 50,
        y2: 100,
    };
    const LYING: BoundingBox = BoundingBox {
        x1: 0,
        y1: 0,
        x2: 100,
        y2: 50,
    };

    fn frame(index: u64) -> Frame {
        Frame::new(RgbImage::new(4, 4), index)
    }

    fn run_script(
        pipeline: &mut FallPipeline,
        script: Vec<Option<BoundingBox>>,
        step: Duration,
    ) -> (Vec<FrameOutcome>, CollectingSink) {
        let mut detector = ScriptedBackend::from_boxes(script.clone());
        let mut sink = CollectingSink::default();
        let start = Instant::now();
        let outcomes = (0..script.len())
            .map(|i| {
                pipeline.process_frame(
                    frame(i as u64 + 1),
                    &mut detector,
                    &mut sink,
                    start + step * i as u32,
                )
            })
            .collect();
        (outcomes, sink)
    }

    #[test]
    fn standing_standing_lying_alerts_once() {
        let mut pipeline = FallPipeline::new(PipelineSettings::default(), 60);
        let (outcomes, sink) = run_script(
            &mut pipeline,
            vec![Some(STANDING), Some(STANDING), Some(LYING), Some(LYING)],
            Duration::from_millis(33),
        );
        assert_eq!(sink.alerts.len(), 1);
        assert!(matches!(outcomes[2], FrameOutcome::Alerted(_)));
        assert!(matches!(outcomes[3], FrameOutcome::Observed(_)));

        let alert = &sink.alerts[0];
        assert_eq!(alert.frame.index, 3);
        let lead: Vec<u64> = alert.lead_up_frames.iter().map(|f| f.index).collect();
        assert_eq!(lead, vec![1, 2]);
        assert_eq!(alert.location, "living_room");
        assert_eq!(pipeline.counters().alerts, 1);
    }

    #[test]
    fn first_frame_lying_is_not_a_fall() {
        let mut pipeline = FallPipeline::new(PipelineSettings::default(), 60);
        let (_, sink) = run_script(&mut pipeline, vec![Some(LYING), Some(LYING)], Duration::ZERO);
        assert!(sink.alerts.is_empty());
    }

    #[test]
    fn missed_frames_do_not_break_the_transition() {
        let mut pipeline = FallPipeline::new(PipelineSettings::default(), 60);
        let (outcomes, sink) = run_script(
            &mut pipeline,
            vec![Some(STANDING), None, None, Some(LYING)],
            Duration::from_millis(33),
        );
        assert_eq!(outcomes[1], FrameOutcome::NoPerson);
        assert_eq!(sink.alerts.len(), 1);
    }

    #[test]
    fn cooldown_suppresses_second_fall() {
        let mut pipeline = FallPipeline::new(PipelineSettings::default(), 60);
        let (outcomes, sink) = run_script(
            &mut pipeline,
            vec![Some(STANDING), Some(LYING), Some(STANDING), Some(LYING)],
            Duration::from_secs(2),
        );
        assert_eq!(sink.alerts.len(), 1);
        match &outcomes[3] {
            FrameOutcome::Suppressed { remaining, .. } => {
                assert_eq!(*remaining, Duration::from_secs(6))
            }
            other => panic!("expected suppression, got {:?}", other),
        }
        assert_eq!(pipeline.counters().suppressed, 1);
    }

    #[test]
    fn fall_after_cooldown_alerts_again() {
        let mut pipeline = FallPipeline::new(PipelineSettings::default(), 60);
        let (_, sink) = run_script(
            &mut pipeline,
            vec![Some(STANDING), Some(LYING), Some(STANDING), Some(LYING)],
            Duration::from_secs(5),
        );
        assert_eq!(sink.alerts.len(), 2);
    }

    #[test]
    fn lead_up_is_bounded_by_buffer() {
        let mut pipeline = FallPipeline::new(PipelineSettings::default(), 3);
        let mut script = vec![Some(STANDING); 6];
        script.push(Some(LYING));
        let (_, sink) = run_script(&mut pipeline, script, Duration::from_millis(33));
        let lead: Vec<u64> = sink.alerts[0].lead_up_frames.iter().map(|f| f.index).collect();
        assert_eq!(lead, vec![5, 6]);
    }

    #[test]
    fn run_stops_at_end_of_stream_and_releases() -> Result<()> {
        use crate::ingest::{SyntheticConfig, SyntheticSource};

        let mut source = SyntheticSource::new(SyntheticConfig::from_url(
            "stub://fall?frames=8&period=4",
        )?);
        source.connect()?;
        let mut pipeline = FallPipeline::for_source(PipelineSettings::default(), &source);
        let mut detector = crate::detect::BlobBackend::new();
        let mut sink = CollectingSink::default();
        let stop = AtomicBool::new(false);

        let summary = pipeline.run(&mut source, &mut detector, &mut sink, &stop)?;
        assert_eq!(summary.reason, StopReason::EndOfStream);
        assert_eq!(summary.counters.frames, 8);
        assert_eq!(sink.alerts.len(), 1);
        assert_eq!(sink.alerts[0].frame.index, 5);
        assert!(!source.is_healthy());
        Ok(())
    }

    #[test]
    fn run_honours_stop_flag() -> Result<()> {
        use crate::ingest::{SyntheticConfig, SyntheticSource};

        let mut source = SyntheticSource::new(SyntheticConfig::from_url("stub://standing")?);
        source.connect()?;
        let mut pipeline = FallPipeline::new(PipelineSettings::default(), 10);
        let stop = AtomicBool::new(true);
        let summary = pipeline.run(
            &mut source,
            &mut crate::detect::BlobBackend::new(),
            &mut CollectingSink::default(),
            &stop,
        )?;
        assert_eq!(summary.reason, StopReason::Signal);
        assert_eq!(summary.counters.frames, 0);
        Ok(())
    }
}
