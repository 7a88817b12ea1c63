pub mod notify;
pub mod render;

pub use notify::{Notification, NotificationCenter, NotificationLevel};
pub use render::ConsoleRenderer;
