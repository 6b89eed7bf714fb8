//! Host side of the runner contract: release selection and playground sessions.

mod playground;
mod registry;

pub use playground::{Playground, RunOutcome, RunReport, SessionId, SessionInfo, Stage};
pub use registry::{RunnerFactory, RunnerRegistry};
