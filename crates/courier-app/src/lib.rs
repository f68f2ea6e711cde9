//! Application wiring: the message orchestrator, callback routing, webhook
//! receiver, and the session GC sweeper.

mod callbacks;
mod orchestrator;
mod state;
mod sweeper;
mod webhook;

pub use orchestrator::Orchestrator;
pub use state::UserStateRegistry;
pub use sweeper::spawn_session_gc;
pub use webhook::{parse_update, router, InboundUpdate};
