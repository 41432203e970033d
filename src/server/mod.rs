pub mod dto;
mod extended;
mod protocol;
pub mod response;
mod router;
mod state;

pub use response::{ApiError, ApiResponse};
pub use router::create_router;
pub use state::{AppState, reaper_for};
