// SPDX-License-Identifier: MPL-2.0

//! Error types for the recorder
//!
//! Errors fall into two groups. Setup and runtime failures that a caller can act on
//! are returned as [`AppError`] and its component errors. Contract violations inside a
//! worker (a GPU validation error mid-frame, a codec handing out a buffer that does not
//! exist) are not recoverable locally and go through [`fatal`], which logs and then
//! takes the worker down.

use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

/// Result type for rendering operations
pub type GraphicsResult<T> = Result<T, GraphicsError>;

/// Result type for encoder operations
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Errors returned to callers of the library
#[derive(Debug, Clone)]
pub enum AppError {
    Graphics(GraphicsError),
    Encoder(EncoderError),
    /// Unreadable or malformed configuration file
    Config(String),
    /// Output directories, watermark assets
    Storage(String),
    /// A worker thread could not be spawned or died while starting
    Worker(String),
}

/// Rendering context errors
#[derive(Debug, Clone)]
pub enum GraphicsError {
    /// No adapter matches the requested configuration
    AdapterNotFound(String),
    /// Device creation failed
    DeviceCreation(String),
    /// A GPU operation reported a validation error
    Validation { op: String, message: String },
    /// Render target could not be created
    SurfaceCreation(String),
    /// A draw was issued with no current surface
    NoCurrentSurface,
    /// The surface handle does not belong to this context
    UnknownSurface,
    /// Reading the rendered frame back failed
    Readback(String),
    /// Window rejected the rendered frame
    Present(String),
    /// The scene (programs and textures) was not prepared yet
    SceneNotPrepared,
    /// The context was released
    ContextReleased,
}

/// Encoder and muxer errors
#[derive(Debug, Clone)]
pub enum EncoderError {
    /// No usable encoder element was found
    NotAvailable(String),
    /// Encoder could not be configured or started
    ConfigurationFailed(String),
    /// Media pipeline error
    Pipeline(String),
    /// Muxer error
    Muxer(String),
    /// The codec reported a buffer index it never handed out
    MissingOutputBuffer(usize),
    /// A sample arrived before the output format was known
    MuxerNotStarted,
    /// The drain worker panicked
    DrainWorkerFailed,
    /// The drain worker did not finish within the bound
    Timeout,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Graphics(e) => write!(f, "Graphics error: {}", e),
            AppError::Encoder(e) => write!(f, "Encoder error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Worker(msg) => write!(f, "Worker error: {}", msg),
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::AdapterNotFound(msg) => {
                write!(f, "No compatible GPU adapter: {}", msg)
            }
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::Validation { op, message } => {
                write!(f, "{}: GPU error: {}", op, message)
            }
            GraphicsError::SurfaceCreation(msg) => write!(f, "Surface creation failed: {}", msg),
            GraphicsError::NoCurrentSurface => write!(f, "No surface is current"),
            GraphicsError::UnknownSurface => write!(f, "Surface does not belong to this context"),
            GraphicsError::Readback(msg) => write!(f, "Frame readback failed: {}", msg),
            GraphicsError::Present(msg) => write!(f, "Window rejected frame: {}", msg),
            GraphicsError::SceneNotPrepared => write!(f, "Programs and textures not created"),
            GraphicsError::ContextReleased => write!(f, "Rendering context was released"),
        }
    }
}

impl fmt::Display for EncoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderError::NotAvailable(msg) => write!(f, "Encoder not available: {}", msg),
            EncoderError::ConfigurationFailed(msg) => {
                write!(f, "Encoder configuration failed: {}", msg)
            }
            EncoderError::Pipeline(msg) => write!(f, "Encoder pipeline error: {}", msg),
            EncoderError::Muxer(msg) => write!(f, "Muxer error: {}", msg),
            EncoderError::MissingOutputBuffer(index) => {
                write!(f, "Codec output buffer {} does not exist", index)
            }
            EncoderError::MuxerNotStarted => write!(f, "Encoded sample before muxer start"),
            EncoderError::DrainWorkerFailed => write!(f, "Encoder drain worker failed"),
            EncoderError::Timeout => write!(f, "Encoder shutdown timed out"),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for EncoderError {}

impl From<GraphicsError> for AppError {
    fn from(err: GraphicsError) -> Self {
        AppError::Graphics(err)
    }
}

impl From<EncoderError> for AppError {
    fn from(err: EncoderError) -> Self {
        AppError::Encoder(err)
    }
}

impl From<String> for EncoderError {
    fn from(msg: String) -> Self {
        EncoderError::Pipeline(msg)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

/// Worker spawn failures
impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Worker(msg)
    }
}

/// Abort the calling worker on a contract violation.
///
/// Used only on worker threads for conditions that indicate driver state corruption or
/// a programming defect. The panic ends the worker; its owner observes it when joining.
#[track_caller]
pub fn fatal(context: &str, err: impl fmt::Display) -> ! {
    tracing::error!(context, error = %err, "Fatal error, stopping worker");
    panic!("{}: {}", context, err);
}
