use std::fmt::{self, Display, Formatter};

use datatype::Target;


/// System-wide commands processed by the update orchestrator, strictly one at
/// a time in arrival order.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub enum Command {
    /// Run one update iteration against the Director and Images repositories.
    CheckForUpdates,
    /// Install the given verified targets to their respective ECUs.
    Install(Vec<Target>),
    /// Assemble and send a vehicle version manifest to the Director.
    SendManifest,
    /// Drain the current command then exit the loop.
    Shutdown,
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            Command::Install(ref targets) => write!(f, "Install({} targets)", targets.len()),
            _ => write!(f, "{:?}", self)
        }
    }
}
