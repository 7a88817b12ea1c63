pub mod audit_logger;

pub use audit_logger::EventAuditLogger;
