//! API endpoint modules.

pub mod events;
pub mod health;
pub mod imports;

pub use events::configure_event_routes;
pub use health::configure_health_routes;
pub use imports::{configure_import_routes, configure_stats_routes};
