//! Store sandbox sessions
//!
//! - `Session`: one container, one connection and a scenario, behind a lock
//! - `SessionRegistry`: the table of live sessions
//! - `SessionManager`: start, execute, end and drain

mod handle;
mod manager;
mod registry;

pub use handle::{Session, SessionHandle, SessionState};
pub use manager::{SessionManager, StartedSession};
pub use registry::{Rejected, SessionRegistry};
