//! Observable-state controllers sitting between the entity gateways and a
//! presentation layer.
//!
//! Every controller operation returns immediately with an [`Operation`]
//! handle; the work runs as a task owned by the controller's
//! [`OperationScope`] and reports back through [`Observable`] cells:
//! `loading` while in flight, `error` on failure, entity state on success.

mod donation_controller;
mod observable;
mod scope;
mod session_controller;
mod user_controller;

pub use donation_controller::DonationController;
pub use observable::Observable;
pub use scope::{Operation, OperationOutcome, OperationScope};
pub use session_controller::{Registration, SessionController, SessionError};
pub use user_controller::UserController;
