// chatwire: realtime chat delivery client.
// Connection lifecycle, offline outbox, typing presence, and realtime
// channel subscription for one chat view at a time. The UI layer on top
// renders; everything here absorbs failures into state instead of throwing.

pub mod chat;
pub mod config;
pub mod credentials;
pub mod models;
pub mod storage;
pub mod utils;

// Re-export the main types for convenience
pub use chat::{ChatSession, SessionDeps, SessionEvents};
pub use config::ClientConfig;
pub use models::*;
