// THEORY:
// Every failure the engine can report lives in one enum. Almost all of them are
// parameter validation problems raised before any work starts, so no partial
// state is ever left behind. A near-zero variance inside a correlation is *not*
// an error: the estimators return 0 and carry on.

use thiserror::Error;

/// Unified error type for all analysis operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GicaError {
    /// Fewer than 2 or more than 8 channels were supplied.
    #[error("channel count {count} outside supported range {min}..={max}")]
    ChannelCount { count: usize, min: usize, max: usize },

    /// A channel does not share the dimensions of the first channel.
    #[error("channel {index} is {width}x{height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        index: usize,
        width: usize,
        height: usize,
        expected_width: usize,
        expected_height: usize,
    },

    /// The input image is not a single-channel grayscale buffer.
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// A plane is too small to compute an unbiased variance.
    #[error("plane has {pixels} pixel(s), at least 2 are needed for a variance")]
    DegeneratePlane { pixels: usize },

    /// A region reaches past the edge of the maps.
    #[error("region ({x}, {y}, {width}x{height}) lies outside the {map_width}x{map_height} map")]
    RegionOutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        map_width: usize,
        map_height: usize,
    },

    /// A region with zero width or height.
    #[error("region has no pixels")]
    EmptyRegion,

    /// A measured region narrower or shorter than the topology window.
    #[error("{width}x{height} region is smaller than the {bin_size}px topology window")]
    RegionTooSmall {
        width: usize,
        height: usize,
        bin_size: usize,
    },

    /// The topology window does not fit inside the image.
    #[error("{width}x{height} image is too small for the {bin_size}px topology window")]
    WindowTooLarge {
        width: usize,
        height: usize,
        bin_size: usize,
    },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// A topology scanner was asked to run a second time.
    #[error("topology scan already started")]
    ScanAlreadyStarted,

    #[error("worker failed: {0}")]
    WorkerFailed(String),
}

impl GicaError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        GicaError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// True for errors caused by the caller's input or configuration.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            GicaError::ScanAlreadyStarted | GicaError::WorkerFailed(_)
        )
    }
}

pub type GicaResult<T> = Result<T, GicaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_values() {
        let err = GicaError::ChannelCount {
            count: 9,
            min: 2,
            max: 8,
        };
        assert_eq!(err.to_string(), "channel count 9 outside supported range 2..=8");

        let err = GicaError::invalid("sample_fraction", "must lie in (0, 1]");
        assert_eq!(
            err.to_string(),
            "invalid parameter `sample_fraction`: must lie in (0, 1]"
        );
    }

    #[test]
    fn validation_classification() {
        assert!(GicaError::EmptyRegion.is_validation());
        assert!(GicaError::RegionTooSmall {
            width: 1,
            height: 3,
            bin_size: 12
        }
        .is_validation());
        assert!(GicaError::DegeneratePlane { pixels: 1 }.is_validation());
        assert!(!GicaError::ScanAlreadyStarted.is_validation());
        assert!(!GicaError::WorkerFailed("panic".into()).is_validation());
    }
}
