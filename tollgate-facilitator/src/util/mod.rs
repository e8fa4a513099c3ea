//! Small runtime utilities for the server binary.

pub mod shutdown;

pub use shutdown::Shutdown;
