//! # Maestro Stores
//!
//! SessionStore implementations. Currently in-memory only; the store
//! contract lives in maestro-core so a durable backend can be added
//! without touching the pipeline.

mod session_store;

pub use session_store::InMemorySessionStore;
