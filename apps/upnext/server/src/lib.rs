//! The holder side of UpNext: one shared room whose queue and cursor are
//! mutated only by client requests and pushed to every connected client.

pub mod config;
pub mod room;
pub mod server;
pub mod telemetry;

pub use config::{Cli, ServerConfig};
pub use room::{Registration, RequestOutcome, RoomSnapshot, SharedRoom};
pub use server::{router, run, serve_on, AppState};
