// error.rs — Crate-wide error type.
//
// Only misuse and misconfiguration end up here. Per-point tracking outcomes
// (out of bounds, degenerate patch, not converged) are ordinary values of
// `TrackingResult` and never surface as errors.

/// Errors raised by constructors, setters, and misuse of the tracking API.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum KltError {
    /// An image or view with a zero dimension.
    #[error("image dimensions must be non-zero, got {width}x{height}")]
    EmptyImage { width: usize, height: usize },

    /// Row stride shorter than the row width.
    #[error("stride ({stride}) must be >= width ({width})")]
    InvalidStride { stride: usize, width: usize },

    /// External buffer too short for the declared geometry.
    #[error("buffer length ({actual}) is smaller than required ({required})")]
    BufferTooSmall { required: usize, actual: usize },

    /// A sub-region that leaves its parent view.
    #[error("region ({x},{y},{width},{height}) exceeds view bounds ({parent_width},{parent_height})")]
    RegionOutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        parent_width: usize,
        parent_height: usize,
    },

    /// Pyramids need at least one level.
    #[error("pyramid must have at least 1 level")]
    EmptyPyramid,

    /// More levels than the level-0 scale factors can express.
    #[error("pyramid level count {levels} exceeds the maximum of {max}")]
    TooManyLevels { levels: usize, max: usize },

    /// Requested pyramid level does not exist.
    #[error("pyramid level {level} out of range (levels: {levels})")]
    LevelOutOfRange { level: usize, levels: usize },

    /// Grid columns/rows must be positive.
    #[error("grid size must be positive, got {cols}x{rows}")]
    InvalidGridSize { cols: usize, rows: usize },

    /// Cursor half-size must be positive on both axes.
    #[error("cursor size must be positive, got {x}x{y}")]
    InvalidCursorSize { x: usize, y: usize },

    /// FAST arc length outside the supported range.
    #[error("arc_length must be 9..=12 (got {0})")]
    InvalidArcLength(usize),

    /// Tracking was requested before a pyramid was bound.
    #[error("{0} pyramid has not been set")]
    PyramidNotSet(&'static str),

    /// Batched inputs of different lengths.
    #[error("point count mismatch: {first} first points, {second} second points")]
    PointCountMismatch { first: usize, second: usize },

    /// A worker pool needs at least one thread.
    #[error("worker pool size must be positive")]
    InvalidPoolSize,

    /// The pool no longer accepts work.
    #[error("worker pool has shut down")]
    PoolClosed,

    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KltError>;
