//! Face matching and liveness.

pub mod descriptor;
pub mod liveness;

pub use descriptor::{
    distance, find_duplicate, is_match, DescriptorError, DescriptorIndex, EnrolledDescriptor, FaceDescriptor,
    DESCRIPTOR_LEN,
};
pub use liveness::{
    CaptureSource, FaceBox, FrameAssessment, FrameObservation, FrameReport, LivenessChecks, LivenessConfig, LivenessError,
    LivenessGate, LivenessPhase, LivenessSession, LivenessVerdict, RecordedCapture,
};
