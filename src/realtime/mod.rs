//! Realtime state: node liveness and viewer presence.
//!
//! Provides the TTL presence store abstraction (Redis or in-process), viewer
//! session bookkeeping, heartbeat timeout detection, the liveness state
//! machine and the node liveness channel protocol.

pub mod channel;
pub mod heartbeat;
pub mod liveness;
pub mod presence;
pub mod redis_store;
pub mod sessions;

// Re-export main types for convenience
pub use channel::{ConnectionSession, NodeMessage};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, HeartbeatStats};
pub use liveness::{LivenessTracker, LivenessUpdate};
pub use presence::{MemoryPresence, PresenceError, PresenceStore};
pub use redis_store::{RedisConfig, RedisPresence};
pub use sessions::{ViewerSession, ViewerSessions, DEFAULT_SESSION_TTL};
