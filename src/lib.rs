/// Shiftdesk - technician scheduling and helpdesk ticketing
///
/// Technicians keep non-overlapping shifts and time off in their own
/// timezone; tickets move through a logged lifecycle; email notifications are
/// sent after the fact and never fail the operation that caused them.

pub mod account;
pub mod api;
pub mod auth;
pub mod backup;
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod locations;
pub mod mailer;
pub mod notify;
pub mod quick_links;
pub mod schedule;
pub mod server;
pub mod tickets;
pub mod timezone;

pub use context::AppContext;
pub use error::{DeskError, DeskResult};
