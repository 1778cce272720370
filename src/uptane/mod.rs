pub mod director;
pub mod fetcher;
pub mod images;
pub mod manifest;
pub mod root;
pub mod test_meta;
pub mod verify;

pub use self::director::DirectorRepo;
pub use self::fetcher::{DownloadLimits, Fetcher};
pub use self::images::ImagesRepo;
pub use self::manifest::{ManifestSigner, has_pending_updates, primary_report, verify_report};
pub use self::root::RootChain;
pub use self::verify::Verifier;

use datatype::RoleData;


/// The outcome of verifying a non-Root role document against local state.
#[derive(Debug, Clone)]
pub struct Verified {
    pub data:    RoleData,
    pub new_ver: u64,
    pub old_ver: u64,
}

impl Verified {
    pub fn is_new(&self) -> bool {
        self.new_ver > self.old_ver
    }
}
