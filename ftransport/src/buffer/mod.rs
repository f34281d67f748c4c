//! Buffering primitives for the ARQ engines.

pub mod window;

pub use window::SendWindow;
