pub mod backend;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod session;
pub mod transport;
pub mod ui;
pub mod utils;

pub use config::{Config, TransportMode};
pub use controller::{TerminalController, UserAction};
pub use error::AppError;
pub use session::SessionTracker;
