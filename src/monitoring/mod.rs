pub mod cap;
pub mod clock;
pub mod controller;
pub mod events;
pub mod gate;
pub mod manager;
pub mod state;

pub use controller::MonitoringController;
pub use events::{BillingFailure, LogEvents, MonitoringEvents};
pub use gate::ViewerRole;
pub use manager::SessionManager;
pub use state::{
    derive_session_state, MonitoringSnapshot, SessionParams, SessionPhase, SessionView,
};

#[cfg(feature = "desktop")]
pub mod commands;
