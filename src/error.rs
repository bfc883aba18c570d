use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DltError {
    /// The camera matrix block of a coefficient vector is singular.
    #[error("degenerate calibration{}", camera_suffix(.camera))]
    DegenerateCalibration { camera: Option<usize> },
    #[error("DLT coefficient L{index} is not a finite number{}", camera_suffix(.camera))]
    NonFiniteCoefficient { index: usize, camera: Option<usize> },
    #[error("expected 11 or 12 DLT coefficients, got {0}")]
    CoefficientCount(usize),
    #[error("camera count mismatch: expected {expected}, found {found}")]
    CameraCountMismatch { expected: usize, found: usize },
    #[error("track count mismatch: expected {expected}, found {found}")]
    TrackCountMismatch { expected: usize, found: usize },
    #[error("expected one image height per camera ({expected}), found {found}")]
    HeightCountMismatch { expected: usize, found: usize },
    #[error("pinhole profile rows have 8 or 12 values, got {0}")]
    ProfileLength(usize),
}

impl DltError {
    /// Attach a camera index to a per-camera calibration error.
    pub fn for_camera(self, camera: usize) -> DltError {
        match self {
            DltError::DegenerateCalibration { .. } => DltError::DegenerateCalibration {
                camera: Some(camera),
            },
            DltError::NonFiniteCoefficient { index, .. } => DltError::NonFiniteCoefficient {
                index,
                camera: Some(camera),
            },
            other => other,
        }
    }
}

fn camera_suffix(camera: &Option<usize>) -> String {
    match camera {
        Some(c) => format!(" for camera {}", c),
        None => String::new(),
    }
}
