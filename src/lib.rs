pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wal;

pub use config::EngineConfig;
pub use engine::{Engine, EngineError, RejectionReason, ResourceOrder};
pub use model::{AvailabilityWindow, Ms, Reservation, Resource, Span, TimeOfDay};
