// Capstan - distributed web-session persistence for clustered applications
//
// Sessions are kept in Redis so any node can serve any request; sessions
// still held in another node's memory are pulled over with the drain
// protocol.

// Re-export the session store
pub use capstan_session::*;

// Re-export the Redis plumbing under its own namespace
pub use capstan_redis;

// Re-export the async runtime for embedders
pub use tokio;
