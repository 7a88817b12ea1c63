pub mod events;
#[cfg(feature = "socket")]
pub mod socket;

pub use events::{decode_frame, Frame, OutputEvent, StatusEvent, TransportEvent};
#[cfg(feature = "socket")]
pub use socket::SocketEventSource;
