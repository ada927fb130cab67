pub mod core;
pub mod crawl;
pub mod embed;
pub mod net;
pub mod schedule;
pub mod store;

pub use core::app_state::AppState;
pub use core::errors::CoreError;
