#[derive(Debug, Clone)]
pub enum TrackError {
    InvalidFrameSize { width: usize, height: usize },
    InvalidPatternSize { width: usize, height: usize },
    BufferSizeMismatch { expected_len: usize, actual_len: usize },
    InvalidStride { stride: usize, width: usize },
}

impl std::fmt::Display for TrackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackError::InvalidFrameSize { width, height } => {
                write!(f, "Invalid frame dimensions: {}x{} (must be > 0)", width, height)
            }
            TrackError::InvalidPatternSize { width, height } => {
                write!(f, "Invalid pattern dimensions: {}x{} (must be > 0)", width, height)
            }
            TrackError::BufferSizeMismatch { expected_len, actual_len } => {
                write!(f, "Buffer length mismatch: expected {}, got {}", expected_len, actual_len)
            }
            TrackError::InvalidStride { stride, width } => {
                write!(f, "Stride ({}) cannot be less than width ({})", stride, width)
            }
        }
    }
}

impl std::error::Error for TrackError {}

pub type TrackResult<T> = Result<T, TrackError>;
