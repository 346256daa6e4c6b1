use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Tunables for the liveness state machine. Progress runs on a 0-100 scale.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LivenessConfig {
    /// Progress at which Detecting hands over to Analyzing
    pub detect_threshold: f64,
    /// Progress at which Analyzing hands over to Verifying
    pub analyze_threshold: f64,
    /// Progress that Verifying cannot pass without enough quality frames
    pub verify_threshold: f64,
    /// Max offset of the face centre from the frame centre, as a fraction of the frame
    pub center_tolerance: f64,
    /// Face area / frame area bounds
    pub min_face_ratio: f64,
    pub max_face_ratio: f64,
    /// Landmarks the detector must report for a usable face
    pub min_landmarks: u32,
    /// Consecutive steady frames required to leave Analyzing
    pub min_stable_frames: u32,
    /// Consecutive fully-passing frames required to pass `verify_threshold`
    pub min_quality_frames: u32,
    /// Above this many steady frames progress moves at `fast_step`
    pub fast_after_stable: u32,
    pub base_step: f64,
    pub fast_step: f64,
    pub no_face_penalty: f64,
    pub center_penalty: f64,
    pub stability_penalty: f64,
    pub size_penalty: f64,
    pub verify_penalty: f64,
    /// Max distance of a face centre from the mean of recent centres (normalised units)
    pub max_jitter: f64,
    /// Number of recent centres kept for the steadiness check
    pub history_len: usize,
    /// Frames a capture run may consume before giving up
    pub max_frames: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            detect_threshold: 25.0,
            analyze_threshold: 60.0,
            verify_threshold: 90.0,
            center_tolerance: 0.30,
            min_face_ratio: 0.08,
            max_face_ratio: 0.75,
            min_landmarks: 5,
            min_stable_frames: 3,
            min_quality_frames: 15,
            fast_after_stable: 5,
            base_step: 1.0,
            fast_step: 2.0,
            no_face_penalty: 3.0,
            center_penalty: 2.0,
            stability_penalty: 1.5,
            size_penalty: 1.0,
            verify_penalty: 0.5,
            max_jitter: 0.05,
            history_len: 10,
            max_frames: 900,
        }
    }
}

/// One detected face in a frame, in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub landmarks: u32,
}

/// Everything the face detector reported for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    pub frame_width: f64,
    pub frame_height: f64,
    pub faces: Vec<FaceBox>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessPhase {
    Detecting,
    Analyzing,
    Verifying,
    Complete,
}

/// Why a frame did or did not help; drives on-screen instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameAssessment {
    NoFace,
    MultipleFaces,
    PoorLandmarks,
    TooFar,
    TooNear,
    OffCenter,
    Unstable,
    Good,
    /// Frame arrived after the verdict was already emitted
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessChecks {
    pub face_detected: bool,
    pub multiple_faces_seen: bool,
    pub centered: bool,
    pub stable: bool,
}

/// Outcome of a completed liveness session.
///
/// Only a session that reached `Complete` can build one, so a verdict handed
/// to the orchestrator always stands for frames that were actually processed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessVerdict {
    pub(crate) session_id: Uuid,
    pub(crate) is_live: bool,
    pub(crate) confidence: f64,
    pub(crate) checks: LivenessChecks,
    pub(crate) frames_processed: u32,
}

impl LivenessVerdict {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    /// Share of processed frames that passed every quality check
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn checks(&self) -> &LivenessChecks {
        &self.checks
    }

    pub fn frames_processed(&self) -> u32 {
        self.frames_processed
    }
}

/// Per-frame progress report
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub phase: LivenessPhase,
    pub progress: f64,
    pub assessment: FrameAssessment,
    pub verdict: Option<LivenessVerdict>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LivenessError {
    #[error("Liveness capture cancelled")]
    Cancelled,

    #[error("Capture source ended after {frames} frames without a verdict")]
    SourceExhausted { frames: u32 },

    #[error("No verdict within {frames} frames")]
    FrameBudgetExceeded { frames: u32 },
}

/// Produces frame observations from a camera or a recording
#[cfg_attr(test, mockall::automock)]
pub trait CaptureSource {
    /// Next observation, or `None` when the source has no more frames
    fn next_frame(&mut self) -> Option<FrameObservation>;

    /// Release the underlying device. Called exactly once per run.
    fn release(&mut self);
}

/// Replays a recorded list of observations
#[derive(Debug, Clone, Default)]
pub struct RecordedCapture {
    frames: VecDeque<FrameObservation>,
    released: bool,
}

impl RecordedCapture {
    pub fn new(frames: Vec<FrameObservation>) -> Self {
        Self {
            frames: frames.into(),
            released: false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl CaptureSource for RecordedCapture {
    fn next_frame(&mut self) -> Option<FrameObservation> {
        self.frames.pop_front()
    }

    fn release(&mut self) {
        self.released = true;
    }
}

struct ReleaseOnDrop<'a>(&'a mut dyn CaptureSource);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Factory for liveness sessions sharing one configuration
#[derive(Debug, Clone, Default)]
pub struct LivenessGate {
    config: LivenessConfig,
}

impl LivenessGate {
    pub fn new(config: LivenessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Open a fresh session in `Detecting` with zero progress
    pub fn start(&self) -> LivenessSession {
        LivenessSession::new(self.config.clone())
    }

    /// Start a session and drive it to a verdict from `source`
    pub fn run(
        &self,
        source: &mut dyn CaptureSource,
        cancel: &AtomicBool,
    ) -> Result<LivenessVerdict, LivenessError> {
        self.start().run(source, cancel)
    }
}

/// State of one capture attempt.
///
/// Only ever moves forward through the phases. Bad frames take progress away
/// but never below the floor of the current phase, and nothing leaves
/// `Complete`.
#[derive(Debug, Clone)]
pub struct LivenessSession {
    id: Uuid,
    config: LivenessConfig,
    phase: LivenessPhase,
    progress: f64,
    stable_frames: u32,
    quality_frames: u32,
    history: VecDeque<(f64, f64)>,
    frames_processed: u32,
    frames_passed: u32,
    multiple_faces_seen: bool,
    verdict_emitted: bool,
}

impl LivenessSession {
    fn new(config: LivenessConfig) -> Self {
        let history = VecDeque::with_capacity(config.history_len);
        Self {
            id: Uuid::new_v4(),
            config,
            phase: LivenessPhase::Detecting,
            progress: 0.0,
            stable_frames: 0,
            quality_frames: 0,
            history,
            frames_processed: 0,
            frames_passed: 0,
            multiple_faces_seen: false,
            verdict_emitted: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> LivenessPhase {
        self.phase
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn is_complete(&self) -> bool {
        self.phase == LivenessPhase::Complete
    }

    /// Feed one frame. The returned report carries the verdict on the frame
    /// that completes the session and never again.
    pub fn process_frame(&mut self, frame: &FrameObservation) -> FrameReport {
        if self.phase == LivenessPhase::Complete {
            return self.report(FrameAssessment::Ignored, None);
        }

        self.frames_processed += 1;

        let assessment = if !frame_is_usable(frame) {
            self.lose_face();
            FrameAssessment::NoFace
        } else {
            match frame.faces.as_slice() {
                [] => {
                    self.lose_face();
                    FrameAssessment::NoFace
                }
                [face] => self.assess_face(frame, face),
                _ => {
                    self.multiple_faces_seen = true;
                    self.lose_face();
                    FrameAssessment::MultipleFaces
                }
            }
        };

        trace!(
            "Liveness {} frame {}: {:?} phase={:?} progress={:.1}",
            self.id, self.frames_processed, assessment, self.phase, self.progress
        );

        let verdict = self.take_verdict();
        self.report(assessment, verdict)
    }

    /// Drive the session from `source` until a verdict, cancellation, the end
    /// of the source, or the frame budget. The source is released on every
    /// exit path.
    pub fn run(
        mut self,
        source: &mut dyn CaptureSource,
        cancel: &AtomicBool,
    ) -> Result<LivenessVerdict, LivenessError> {
        let guard = ReleaseOnDrop(source);
        debug!("Liveness session {} started", self.id);

        loop {
            if cancel.load(Ordering::Relaxed) {
                info!("Liveness session {} cancelled after {} frames", self.id, self.frames_processed);
                return Err(LivenessError::Cancelled);
            }

            if self.frames_processed >= self.config.max_frames {
                return Err(LivenessError::FrameBudgetExceeded {
                    frames: self.frames_processed,
                });
            }

            let frame = match guard.0.next_frame() {
                Some(frame) => frame,
                None => {
                    return Err(LivenessError::SourceExhausted {
                        frames: self.frames_processed,
                    })
                }
            };

            if let Some(verdict) = self.process_frame(&frame).verdict {
                info!(
                    "Liveness session {} complete after {} frames (confidence {:.2})",
                    self.id, verdict.frames_processed, verdict.confidence
                );
                return Ok(verdict);
            }
        }
    }

    fn report(&self, assessment: FrameAssessment, verdict: Option<LivenessVerdict>) -> FrameReport {
        FrameReport {
            phase: self.phase,
            progress: self.progress,
            assessment,
            verdict,
        }
    }

    /// Zero or several faces: all streaks break
    fn lose_face(&mut self) {
        self.stable_frames = 0;
        self.quality_frames = 0;
        self.history.clear();

        if self.phase == LivenessPhase::Detecting {
            self.progress = 0.0;
        } else {
            self.penalize(self.config.no_face_penalty);
        }
    }

    fn assess_face(&mut self, frame: &FrameObservation, face: &FaceBox) -> FrameAssessment {
        let frame_area = frame.frame_width * frame.frame_height;
        let ratio = (face.width * face.height) / frame_area;

        let size_problem = if face.landmarks < self.config.min_landmarks {
            Some(FrameAssessment::PoorLandmarks)
        } else if ratio < self.config.min_face_ratio {
            Some(FrameAssessment::TooFar)
        } else if ratio > self.config.max_face_ratio {
            Some(FrameAssessment::TooNear)
        } else {
            None
        };

        if let Some(problem) = size_problem {
            self.stable_frames = 0;
            self.quality_frames = 0;
            self.penalize(self.config.size_penalty);
            return problem;
        }

        let center = (
            (face.x + face.width / 2.0) / frame.frame_width,
            (face.y + face.height / 2.0) / frame.frame_height,
        );
        let centered = (center.0 - 0.5).abs() < self.config.center_tolerance
            && (center.1 - 0.5).abs() < self.config.center_tolerance;
        let steady = self.is_steady(center);

        self.history.push_back(center);
        while self.history.len() > self.config.history_len {
            self.history.pop_front();
        }

        if steady {
            self.stable_frames += 1;
        } else {
            self.stable_frames = 0;
        }

        if centered && steady {
            self.quality_frames += 1;
            self.frames_passed += 1;
        } else {
            self.quality_frames = 0;
        }

        let step = if self.stable_frames > self.config.fast_after_stable {
            self.config.fast_step
        } else {
            self.config.base_step
        };
        self.progress = (self.progress + step).min(100.0);

        match self.phase {
            LivenessPhase::Detecting if !centered => self.penalize(self.config.center_penalty),
            LivenessPhase::Analyzing if self.stable_frames < self.config.min_stable_frames => {
                self.penalize(self.config.stability_penalty)
            }
            LivenessPhase::Verifying if self.quality_frames < self.config.min_quality_frames => {
                self.penalize(self.config.verify_penalty)
            }
            _ => {}
        }

        self.apply_gate(centered);
        self.advance_phase(centered);

        if !centered {
            FrameAssessment::OffCenter
        } else if !steady {
            FrameAssessment::Unstable
        } else {
            FrameAssessment::Good
        }
    }

    fn is_steady(&self, center: (f64, f64)) -> bool {
        if self.history.is_empty() {
            return true;
        }
        let n = self.history.len() as f64;
        let (sum_x, sum_y) = self
            .history
            .iter()
            .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
        let (dx, dy) = (center.0 - sum_x / n, center.1 - sum_y / n);
        (dx * dx + dy * dy).sqrt() <= self.config.max_jitter
    }

    /// Hold progress at the next threshold while its requirement is unmet
    fn apply_gate(&mut self, centered: bool) {
        let cap = match self.phase {
            LivenessPhase::Detecting if !centered => Some(self.config.detect_threshold),
            LivenessPhase::Analyzing if self.stable_frames < self.config.min_stable_frames => {
                Some(self.config.analyze_threshold)
            }
            LivenessPhase::Verifying if self.quality_frames < self.config.min_quality_frames => {
                Some(self.config.verify_threshold)
            }
            _ => None,
        };
        if let Some(cap) = cap {
            self.progress = self.progress.min(cap);
        }
    }

    fn advance_phase(&mut self, centered: bool) {
        loop {
            let next = match self.phase {
                LivenessPhase::Detecting if centered && self.progress >= self.config.detect_threshold => {
                    LivenessPhase::Analyzing
                }
                LivenessPhase::Analyzing
                    if self.progress >= self.config.analyze_threshold
                        && self.stable_frames >= self.config.min_stable_frames =>
                {
                    LivenessPhase::Verifying
                }
                LivenessPhase::Verifying
                    if self.progress >= 100.0 && self.quality_frames >= self.config.min_quality_frames =>
                {
                    LivenessPhase::Complete
                }
                _ => break,
            };
            debug!("Liveness {} {:?} -> {:?} at {:.1}", self.id, self.phase, next, self.progress);
            self.phase = next;
        }
    }

    fn phase_floor(&self) -> f64 {
        match self.phase {
            LivenessPhase::Detecting => 0.0,
            LivenessPhase::Analyzing => self.config.detect_threshold,
            LivenessPhase::Verifying => self.config.analyze_threshold,
            LivenessPhase::Complete => 100.0,
        }
    }

    fn penalize(&mut self, amount: f64) {
        self.progress = (self.progress - amount).max(self.phase_floor());
    }

    fn take_verdict(&mut self) -> Option<LivenessVerdict> {
        if self.phase != LivenessPhase::Complete || self.verdict_emitted {
            return None;
        }
        self.verdict_emitted = true;

        let confidence = if self.frames_processed == 0 {
            0.0
        } else {
            self.frames_passed as f64 / self.frames_processed as f64
        };

        Some(LivenessVerdict {
            session_id: self.id,
            is_live: true,
            confidence,
            checks: LivenessChecks {
                face_detected: true,
                multiple_faces_seen: self.multiple_faces_seen,
                centered: true,
                stable: true,
            },
            frames_processed: self.frames_processed,
        })
    }
}

fn frame_is_usable(frame: &FrameObservation) -> bool {
    frame.frame_width.is_finite()
        && frame.frame_height.is_finite()
        && frame.frame_width > 0.0
        && frame.frame_height > 0.0
        && frame
            .faces
            .iter()
            .all(|f| f.x.is_finite() && f.y.is_finite() && f.width.is_finite() && f.height.is_finite())
}

/// Synthetic frames for tests and demos
pub mod fixtures {
    use super::{FaceBox, FrameObservation};

    pub const WIDTH: f64 = 640.0;
    pub const HEIGHT: f64 = 480.0;

    /// A single well-sized face in the middle of the frame
    pub fn centered_face() -> FrameObservation {
        face_at(320.0, 240.0, 240.0, 280.0)
    }

    /// A single face of the given size centred at (cx, cy)
    pub fn face_at(cx: f64, cy: f64, width: f64, height: f64) -> FrameObservation {
        FrameObservation {
            frame_width: WIDTH,
            frame_height: HEIGHT,
            faces: vec![FaceBox {
                x: cx - width / 2.0,
                y: cy - height / 2.0,
                width,
                height,
                landmarks: 68,
            }],
        }
    }

    pub fn empty() -> FrameObservation {
        FrameObservation {
            frame_width: WIDTH,
            frame_height: HEIGHT,
            faces: Vec::new(),
        }
    }

    pub fn two_faces() -> FrameObservation {
        let mut frame = face_at(200.0, 240.0, 160.0, 200.0);
        frame.faces.extend(face_at(440.0, 240.0, 160.0, 200.0).faces);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn session() -> LivenessSession {
        LivenessGate::default().start()
    }

    #[test]
    fn test_no_faces_never_leaves_detecting() {
        let mut s = session();
        for _ in 0..500 {
            let report = s.process_frame(&empty());
            assert_eq!(report.phase, LivenessPhase::Detecting);
            assert_eq!(report.progress, 0.0);
            assert!(report.verdict.is_none());
        }
    }

    #[test]
    fn test_alternating_face_and_no_face_resets_progress() {
        let mut s = session();
        for _ in 0..100 {
            let with_face = s.process_frame(&centered_face());
            assert!(with_face.progress > 0.0);

            let without = s.process_frame(&empty());
            assert_eq!(without.assessment, FrameAssessment::NoFace);
            assert_eq!(without.progress, 0.0);
            assert_eq!(without.phase, LivenessPhase::Detecting);
        }
    }

    #[test]
    fn test_multiple_faces_reset_and_are_reported() {
        let mut s = session();
        for _ in 0..10 {
            s.process_frame(&centered_face());
        }
        let report = s.process_frame(&two_faces());
        assert_eq!(report.assessment, FrameAssessment::MultipleFaces);
        assert_eq!(report.progress, 0.0);
    }

    #[test]
    fn test_sustained_good_face_completes_once() {
        let mut s = session();
        let mut verdicts = Vec::new();
        let mut phases = Vec::new();

        for _ in 0..200 {
            let report = s.process_frame(&centered_face());
            if phases.last() != Some(&report.phase) {
                phases.push(report.phase);
            }
            verdicts.extend(report.verdict);
        }

        assert_eq!(
            phases,
            vec![
                LivenessPhase::Detecting,
                LivenessPhase::Analyzing,
                LivenessPhase::Verifying,
                LivenessPhase::Complete
            ]
        );
        assert_eq!(verdicts.len(), 1);
        let verdict = &verdicts[0];
        assert!(verdict.is_live);
        assert_eq!(verdict.session_id, s.id());
        assert!(verdict.confidence > 0.99);
        assert!(!verdict.checks.multiple_faces_seen);
    }

    #[test]
    fn test_off_center_face_cannot_leave_detecting() {
        let mut s = session();
        for _ in 0..300 {
            let report = s.process_frame(&face_at(40.0, 40.0, 200.0, 200.0));
            assert_eq!(report.phase, LivenessPhase::Detecting);
            assert!(report.progress <= 25.0);
        }
    }

    #[test]
    fn test_wrong_distance_decrements_but_respects_phase_floor() {
        let mut s = session();
        while s.phase() != LivenessPhase::Analyzing || s.progress() < 35.0 {
            s.process_frame(&centered_face());
        }
        let before = s.progress();

        let far = face_at(320.0, 240.0, 40.0, 40.0);
        let report = s.process_frame(&far);
        assert_eq!(report.assessment, FrameAssessment::TooFar);
        assert!(report.progress < before);

        for _ in 0..200 {
            let report = s.process_frame(&far);
            assert_eq!(report.phase, LivenessPhase::Analyzing);
            assert!(report.progress >= 25.0);
        }
        assert_eq!(s.progress(), 25.0);

        let near = face_at(320.0, 240.0, 620.0, 470.0);
        assert_eq!(s.process_frame(&near).assessment, FrameAssessment::TooNear);
    }

    #[test]
    fn test_jittery_face_never_completes() {
        let mut s = session();
        for i in 0..600 {
            let offset = if i % 2 == 0 { -60.0 } else { 60.0 };
            let report = s.process_frame(&face_at(320.0 + offset, 240.0, 240.0, 280.0));
            assert!(report.verdict.is_none());
            assert_ne!(report.phase, LivenessPhase::Complete);
        }
    }

    #[test]
    fn test_momentary_good_frames_cannot_pass_verify_gate() {
        let config = LivenessConfig::default();
        let mut s = session();
        while s.phase() != LivenessPhase::Verifying {
            s.process_frame(&centered_face());
        }
        // Break the quality streak every few frames
        for i in 0..400 {
            let frame = if i % 5 == 0 { face_at(320.0, 240.0, 40.0, 40.0) } else { centered_face() };
            let report = s.process_frame(&frame);
            assert!(report.progress <= config.verify_threshold);
            assert!(report.verdict.is_none());
        }
    }

    #[test]
    fn test_poor_landmarks_are_quality_failures() {
        let mut s = session();
        let mut frame = centered_face();
        frame.faces[0].landmarks = 2;
        assert_eq!(s.process_frame(&frame).assessment, FrameAssessment::PoorLandmarks);
    }

    #[test]
    fn test_degenerate_frame_counts_as_no_face() {
        let mut s = session();
        let mut frame = centered_face();
        frame.frame_width = 0.0;
        assert_eq!(s.process_frame(&frame).assessment, FrameAssessment::NoFace);
    }

    #[test]
    fn test_run_releases_source_on_completion() {
        let mut source = RecordedCapture::new(vec![centered_face(); 120]);
        let cancel = AtomicBool::new(false);

        let verdict = session().run(&mut source, &cancel).unwrap();

        assert!(verdict.is_live);
        assert!(source.is_released());
    }

    #[test]
    fn test_run_reports_exhausted_source() {
        let mut source = RecordedCapture::new(vec![empty(); 10]);
        let cancel = AtomicBool::new(false);

        let err = session().run(&mut source, &cancel).unwrap_err();

        assert_eq!(err, LivenessError::SourceExhausted { frames: 10 });
        assert!(source.is_released());
    }

    #[test]
    fn test_run_cancelled_releases_exactly_once() {
        let mut source = MockCaptureSource::new();
        source.expect_next_frame().never();
        source.expect_release().times(1).return_const(());

        let cancel = AtomicBool::new(true);
        let err = session().run(&mut source, &cancel).unwrap_err();

        assert_eq!(err, LivenessError::Cancelled);
    }

    #[test]
    fn test_run_respects_frame_budget() {
        let config = LivenessConfig {
            max_frames: 20,
            ..LivenessConfig::default()
        };
        let mut source = MockCaptureSource::new();
        source.expect_next_frame().times(20).returning(|| Some(centered_face()));
        source.expect_release().times(1).return_const(());

        let err = LivenessGate::new(config)
            .start()
            .run(&mut source, &AtomicBool::new(false))
            .unwrap_err();

        assert_eq!(err, LivenessError::FrameBudgetExceeded { frames: 20 });
    }

    #[test]
    fn test_frames_after_completion_are_ignored() {
        let mut s = session();
        let mut count = 0;
        for _ in 0..80 {
            count += s.process_frame(&centered_face()).verdict.is_some() as usize;
        }
        assert!(s.is_complete());
        let after = s.process_frame(&empty());
        assert_eq!(after.assessment, FrameAssessment::Ignored);
        assert_eq!(after.phase, LivenessPhase::Complete);
        assert_eq!(count, 1);
    }
}
