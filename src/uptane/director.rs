use serde_json as json;

use datatype::{Error, RepoName, RoleData, RoleName, Target, TufSigned};
use uptane::{RootChain, Verified};


/// Per-vehicle instructions: which ECUs should run which targets. Holds the
/// verified Root lineage and the current Targets document.
pub struct DirectorRepo {
    pub root: RootChain,
    targets:  Option<RoleData>,
}

impl DirectorRepo {
    pub fn new() -> DirectorRepo {
        DirectorRepo {
            root:    RootChain::new(RepoName::Director),
            targets: None,
        }
    }

    /// Return the in-memory view to a blank state so verification can be
    /// replayed from storage at the start of each iteration.
    pub fn reset_meta(&mut self) {
        self.root.reset();
        self.targets = None;
    }

    pub fn init_root(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.root.init(bytes)
    }

    pub fn verify_root(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.root.update(bytes)
    }

    pub fn root_version(&self) -> u64 {
        self.root.version()
    }

    pub fn root_expired(&self) -> bool {
        self.root.expired()
    }

    /// Verify a Targets document against the current Root. An equal version
    /// is "no change"; an older one is a rollback attack.
    pub fn verify_targets(&mut self, bytes: &[u8], local_version: u64) -> Result<Verified, Error> {
        let signed = json::from_slice::<TufSigned>(bytes)?;
        self.root.verifier()?.verify_signed(RoleName::Targets, &signed)?;

        let data = json::from_value::<RoleData>(signed.signed)?;
        if data._type != RoleName::Targets {
            return Err(Error::TufRole(format!("expected Targets, got {}", data._type)));
        } else if data.version < local_version {
            return Err(Error::RollbackAttack(format!("director targets version {} < local {}",
                                                     data.version, local_version)));
        } else if data.expired() {
            return Err(Error::ExpiredMetadata("director targets".into()));
        }

        let verified = Verified { data: data.clone(), new_ver: data.version, old_ver: local_version };
        self.targets = Some(data);
        Ok(verified)
    }

    pub fn targets_version(&self) -> u64 {
        self.targets.as_ref().map_or(0, |data| data.version)
    }

    /// The ordered list of targets with their Director-specific custom fields.
    pub fn targets(&self) -> Vec<Target> {
        let mut targets = self.targets.as_ref()
            .and_then(|data| data.targets.as_ref())
            .map_or(Vec::new(), |targets| {
                targets.iter()
                    .map(|(name, meta)| Target::from_meta(name.clone(), meta.clone()))
                    .collect()
            });
        targets.sort_by(|a, b| a.filename.cmp(&b.filename));
        targets
    }
}
