//! Room-based session transport
//!
//! Clients join a room over WebSocket (`/ws/:room`), send control messages
//! and receive every progress event emitted for that room.

pub mod events;
pub mod rate_limit;
pub mod rooms;
pub mod server;
pub mod ws;

pub use events::{
    ControlError, ControlMessage, HistoryOutcome, ImageInput, ProgressEvent, ProgressSink,
    RecordingSink,
};
pub use rate_limit::{RateLimiter, RoomLimiters};
pub use rooms::{RoomHub, RoomSink, RoomSubscription};
pub use server::{create_router, serve, AppState};
