//! Text transformation engine and file pipeline.
//!
//! [`TransformRequest`] is the pure half: parameters are validated into a
//! tagged variant before any I/O happens, and `apply` maps content to
//! output infallibly after that. [`FilePipeline`] is the I/O half: it reads
//! the input artifact (streaming the line count case), runs the transform,
//! and writes the result artifact into the worker's result directory.

pub mod pipeline;
pub mod transform;

// Re-export main types for convenience
pub use pipeline::FilePipeline;
pub use transform::TransformRequest;
