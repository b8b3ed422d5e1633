//! The connection supervisor: a public handle plus a background task that
//! owns the connection state machine.

mod builder;
mod handle;
mod run;
mod state;

pub use builder::SupervisorBuilder;
pub use handle::{PushSupervisor, SupervisorError};
pub use state::ConnectionState;
