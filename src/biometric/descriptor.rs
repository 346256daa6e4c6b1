use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of values in a face embedding
pub const DESCRIPTOR_LEN: usize = 128;

/// Descriptor validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DescriptorError {
    #[error("Descriptor must have {expected} values, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("Descriptor value at index {0} is not a finite number")]
    NonFinite(usize),
}

/// A validated 128-value face embedding.
///
/// The only way to obtain one is through `FaceDescriptor::new`, so every
/// instance satisfies the length and finiteness invariant.
#[derive(Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FaceDescriptor(Vec<f32>);

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Result<Self, DescriptorError> {
        check_shape(&values)?;
        Ok(Self(values))
    }

    /// Build from the f64 values most model bindings hand out
    pub fn from_f64(values: &[f64]) -> Result<Self, DescriptorError> {
        if let Some(idx) = values.iter().position(|v| !v.is_finite() || v.abs() > f32::MAX as f64) {
            return Err(DescriptorError::NonFinite(idx));
        }
        Self::new(values.iter().map(|v| *v as f32).collect())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn distance_to(&self, other: &FaceDescriptor) -> f64 {
        distance(&self.0, &other.0)
    }
}

// Values are biometric data; keep them out of logs.
impl fmt::Debug for FaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaceDescriptor([{} values])", self.0.len())
    }
}

impl<'de> Deserialize<'de> for FaceDescriptor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let values = Vec::<f32>::deserialize(deserializer)?;
        FaceDescriptor::new(values).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<Vec<f32>> for FaceDescriptor {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        FaceDescriptor::new(values)
    }
}

fn check_shape(values: &[f32]) -> Result<(), DescriptorError> {
    if values.len() != DESCRIPTOR_LEN {
        return Err(DescriptorError::WrongLength {
            expected: DESCRIPTOR_LEN,
            actual: values.len(),
        });
    }
    if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
        return Err(DescriptorError::NonFinite(idx));
    }
    Ok(())
}

/// Euclidean distance between two raw descriptors.
///
/// Returns `f64::INFINITY` instead of failing when either side is malformed
/// or the lengths differ, so one bad record can never break a scan.
pub fn distance(a: &[f32], b: &[f32]) -> f64 {
    if check_shape(a).is_err() || check_shape(b).is_err() {
        debug!("Refusing to compare malformed descriptors ({} / {} values)", a.len(), b.len());
        return f64::INFINITY;
    }

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = *x as f64 - *y as f64;
            diff * diff
        })
        .sum::<f64>()
        .sqrt()
}

/// True when the two descriptors are closer than `threshold`
pub fn is_match(a: &[f32], b: &[f32], threshold: f64) -> bool {
    distance(a, b) < threshold
}

/// A stored descriptor together with the identity that owns it
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledDescriptor {
    pub identity_id: String,
    pub descriptor: FaceDescriptor,
}

/// Uniqueness lookup over the enrolled population.
///
/// Implementations return *a* match, not the closest one; callers only rely
/// on whether something was found.
pub trait DescriptorIndex {
    fn find_duplicate(
        &self,
        candidate: &FaceDescriptor,
        threshold: f64,
        exclude_id: Option<&str>,
    ) -> Option<&EnrolledDescriptor>;
}

impl DescriptorIndex for [EnrolledDescriptor] {
    fn find_duplicate(
        &self,
        candidate: &FaceDescriptor,
        threshold: f64,
        exclude_id: Option<&str>,
    ) -> Option<&EnrolledDescriptor> {
        self.iter()
            .filter(|enrolled| exclude_id != Some(enrolled.identity_id.as_str()))
            .find(|enrolled| candidate.distance_to(&enrolled.descriptor) < threshold)
    }
}

/// Linear scan: first enrolled descriptor within `threshold` of `candidate`,
/// skipping `exclude_id`
pub fn find_duplicate<'a>(
    candidate: &FaceDescriptor,
    enrolled: &'a [EnrolledDescriptor],
    threshold: f64,
    exclude_id: Option<&str>,
) -> Option<&'a EnrolledDescriptor> {
    enrolled.find_duplicate(candidate, threshold, exclude_id)
}
