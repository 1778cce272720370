pub mod binary;
pub mod ostree;

use std::collections::HashMap;

use datatype::{Error, InstallCode, InstallOutcome, PacManConfig, PacManKind, Target};
use storage::Storage;


/// Optional credentials forwarded to the package manager.
#[derive(Default)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub ca_file:      Option<String>,
    pub cert_file:    Option<String>,
    pub pkey_file:    Option<String>,
}


/// The package manager that performs the final image install on the primary.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PacMan {
    Off,
    Ostree { sysroot: String },
    Binary { install_dir: String },
    Test { filename: String, succeeds: bool },
}

impl PacMan {
    pub fn from_config(config: &PacManConfig) -> PacMan {
        match config.kind {
            PacManKind::None   => PacMan::Off,
            PacManKind::Ostree => PacMan::Ostree { sysroot: config.sysroot.clone() },
            PacManKind::Binary => PacMan::Binary { install_dir: config.sysroot.clone() },
        }
    }

    /// Install a downloaded target, returning the outcome rather than an
    /// error for ordinary installation failures.
    pub fn install(&self, storage: &mut Storage, target: &Target, creds: &Credentials)
                   -> Result<InstallOutcome, Error> {
        match *self {
            PacMan::Off => Ok(InstallOutcome::empty(InstallCode::OK)),
            PacMan::Ostree { ref sysroot } => ostree::install(sysroot, target, creds),
            PacMan::Binary { ref install_dir } => binary::install(install_dir, storage, target),
            PacMan::Test { ref filename, succeeds } => test::install(filename, &target.filename, succeeds),
        }
    }

    /// What the primary currently runs: `(filepath, length, hashes)`.
    pub fn current_image(&self, storage: &Storage) -> Option<(String, u64, HashMap<String, String>)> {
        match *self {
            PacMan::Ostree { .. } => ostree::current_image(),
            _ => storage.load_installed_versions().ok()
                    .and_then(|versions| versions.into_iter().last())
                    .map(|version| (version.filename, version.length, version.hashes)),
        }
    }

    /// Whether the target is already what the primary runs, compared by hash.
    pub fn is_installed(&self, storage: &Storage, target: &Target) -> bool {
        match self.current_image(storage) {
            Some((_, _, ref hashes)) => {
                target.hashes.iter().any(|(algo, digest)| hashes.get(algo) == Some(digest))
            }
            None => false
        }
    }
}
