pub mod client;
pub mod config;
pub mod mode;
pub mod playback;
pub mod session;
pub mod state;
pub mod stream;

// Re-export main types for convenience
pub use client::{AgentClient, Health, QueryRequest, QueryResponse};
pub use config::{Config, Endpoints};
pub use mode::Mode;
pub use playback::{batch_size, PlaybackScheduler};
pub use session::{Orchestrator, Playback, Session, SessionConfig, SessionOutcome, SessionUpdate};
pub use state::{ChatMessage, ChatRole, Conversation, HistoryEntry};
pub use stream::{FrameDecoder, Framing, StreamEvent};
