use std::fmt::{self, Display, Formatter};

use datatype::{InstallResult, Target};


/// System-wide events that are broadcast to all interested parties.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Event {
    /// General error event with a printable representation for debugging.
    Error(String),

    /// The update iteration found no new targets.
    TimestampUpdated,
    /// New targets were verified against both repositories and downloaded.
    TargetsUpdated(Vec<Target>),

    /// An update was installed on the primary.
    InstallComplete(InstallResult),
    /// The installation of an update on the primary failed.
    InstallFailed(InstallResult),

    /// A signed vehicle version manifest was sent to the Director.
    ManifestSent,
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            Event::TargetsUpdated(ref targets) => write!(f, "TargetsUpdated({} targets)", targets.len()),
            _ => write!(f, "{:?}", self)
        }
    }
}
