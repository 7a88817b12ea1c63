pub mod model;
pub mod tracker;

pub use model::{
    status_line, CommandSession, CommandStatus, Indicator, OutputKind, OutputLine,
};
pub use tracker::{PanelView, SessionTracker, SnapshotOutcome};
