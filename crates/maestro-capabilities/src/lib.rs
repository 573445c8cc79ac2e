//! # Maestro Capabilities
//!
//! Built-in capability collection: specs, handlers and a registration
//! helper. Handlers here are deterministic stand-ins for the real
//! domain services so the pipeline can run end to end in development
//! and in tests.

mod builtin;
mod qna;

pub use builtin::{register_builtins, DocumentsHandler, EchoHandler, FeasibilityHandler,
    ProjectHandler, ReportHandler};
pub use qna::StaticQnaProvider;
