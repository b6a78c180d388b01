pub mod guard;
pub mod orchestrator;
pub mod poller;
pub mod reservation;
pub mod session;
pub mod site;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::domain::model::{AuthSession, DateWindow, Event, Reservation, Slot};
pub use crate::domain::ports::{ChallengeSolver, Clock, Notifier, RemoteActuator};
pub use crate::utils::error::Result;
