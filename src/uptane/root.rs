use chrono::Utc;
use serde_json as json;

use datatype::{Error, RepoName, RoleData, RoleName, TufSigned};
use uptane::Verifier;


/// The verified Root lineage of one repository. Rotations must be applied one
/// version at a time, each new Root signed both by the previous Root's keys
/// and by its own (self-signing).
pub struct RootChain {
    repo:    RepoName,
    current: Option<RootState>,
}

struct RootState {
    data:     RoleData,
    verifier: Verifier,
}

fn parse_root(bytes: &[u8]) -> Result<(TufSigned, RoleData, Verifier), Error> {
    let signed = json::from_slice::<TufSigned>(bytes)?;
    let data = json::from_value::<RoleData>(signed.signed.clone())?;
    if data._type != RoleName::Root {
        return Err(Error::TufRole(format!("expected Root, got {}", data._type)));
    }
    let verifier = {
        let keys = data.keys.as_ref().ok_or_else(|| Error::Parse("root missing `keys` field".into()))?;
        let roles = data.roles.as_ref().ok_or_else(|| Error::Parse("root missing `roles` field".into()))?;
        Verifier::from_root(keys, roles)?
    };
    Ok((signed, data, verifier))
}

impl RootChain {
    pub fn new(repo: RepoName) -> RootChain {
        RootChain { repo: repo, current: None }
    }

    pub fn repo(&self) -> RepoName {
        self.repo
    }

    /// Forget the in-memory chain; persistent state is untouched.
    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn version(&self) -> u64 {
        self.current.as_ref().map_or(0, |state| state.data.version)
    }

    /// Expiry is only consulted when the repository is about to be used, never
    /// while rotating through historical Roots.
    pub fn expired(&self) -> bool {
        self.current.as_ref().map_or(true, |state| state.data.expires < Utc::now())
    }

    /// The key registry of the current Root, for verifying the other roles.
    pub fn verifier(&self) -> Result<&Verifier, Error> {
        self.current.as_ref()
            .map(|state| &state.verifier)
            .ok_or_else(|| Error::MissingRepo(format!("no {} root metadata", self.repo)))
    }

    /// Establish trust from a stored or initially fetched Root. The document
    /// must meet its own Root-role threshold.
    pub fn init(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let (signed, data, verifier) = parse_root(bytes)?;
        verifier.verify_signed(RoleName::Root, &signed)?;
        debug!("{} root initialised at version {}", self.repo, data.version);
        self.current = Some(RootState { data: data, verifier: verifier });
        Ok(())
    }

    /// Apply the next Root version: consecutive, cross-signed by the current
    /// Root's keys, and self-signed by its own.
    pub fn update(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let (signed, data, verifier) = parse_root(bytes)?;
        {
            let state = self.current.as_ref()
                .ok_or_else(|| Error::MissingRepo(format!("no {} root to rotate from", self.repo)))?;
            if data.version <= state.data.version {
                return Err(Error::RollbackAttack(format!("{} root version {} <= current {}",
                                                         self.repo, data.version, state.data.version)));
            } else if data.version != state.data.version + 1 {
                return Err(Error::RollbackAttack(format!("{} root version skips from {} to {}",
                                                         self.repo, state.data.version, data.version)));
            }
            state.verifier.verify_signed(RoleName::Root, &signed)?;
            verifier.verify_signed(RoleName::Root, &signed)?;
        }
        debug!("{} root rotated from {} to {}", self.repo, self.version(), data.version);
        self.current = Some(RootState { data: data, verifier: verifier });
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use uptane::test_meta::{RootKeys, signed_root};


    #[test]
    fn init_establishes_version() {
        let keys = RootKeys::generate(1);
        let bytes = signed_root(&keys, &keys, 1, false);
        let mut chain = RootChain::new(RepoName::Director);
        chain.init(&bytes).expect("init root");
        assert_eq!(chain.version(), 1);
        assert!(!chain.expired());
    }

    #[test]
    fn rotation_requires_both_thresholds() {
        let old = RootKeys::generate(1);
        let new = RootKeys::generate(1);
        let mut chain = RootChain::new(RepoName::Director);
        chain.init(&signed_root(&old, &old, 1, false)).expect("init root");

        // v2 signed only by its own keys fails under the old root
        let self_only = signed_root(&new, &new, 2, false);
        assert!(chain.update(&self_only).is_err());

        // v2 cross-signed by v1 keys and self-signed passes
        let crossed = new.cross_signed(&old, 2, false);
        chain.update(&crossed).expect("rotate to v2");
        assert_eq!(chain.version(), 2);
    }

    #[test]
    fn version_gap_rejected() {
        let keys = RootKeys::generate(1);
        let mut chain = RootChain::new(RepoName::Images);
        chain.init(&signed_root(&keys, &keys, 1, false)).expect("init root");
        match chain.update(&signed_root(&keys, &keys, 3, false)) {
            Err(Error::RollbackAttack(_)) => (),
            other => panic!("expected RollbackAttack, got {:?}", other)
        }
    }

    #[test]
    fn version_regression_rejected() {
        let keys = RootKeys::generate(1);
        let mut chain = RootChain::new(RepoName::Images);
        chain.init(&signed_root(&keys, &keys, 2, false)).expect("init root");
        match chain.update(&signed_root(&keys, &keys, 1, false)) {
            Err(Error::RollbackAttack(_)) => (),
            other => panic!("expected RollbackAttack, got {:?}", other)
        }
    }

    #[test]
    fn rotating_through_expired_root_is_permitted() {
        let keys = RootKeys::generate(1);
        let mut chain = RootChain::new(RepoName::Director);
        chain.init(&signed_root(&keys, &keys, 1, true)).expect("init expired root");
        assert!(chain.expired());
        chain.update(&signed_root(&keys, &keys, 2, false)).expect("rotate out of expiry");
        assert!(!chain.expired());
    }
}
