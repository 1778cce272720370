use crypto::digest::Digest;
use crypto::sha2::Sha256;
use serde_json as json;

use datatype::{Error, RepoName, RoleData, RoleName, Target, TufSigned};
use uptane::{RootChain, Verified};


/// The fleet-wide source of truth for authoritative images. Metadata is
/// pulled and verified in the fixed order Root, Timestamp, Snapshot, Targets.
pub struct ImagesRepo {
    pub root:  RootChain,
    timestamp: Option<RoleData>,
    snapshot:  Option<RoleData>,
    targets:   Option<RoleData>,
}

impl ImagesRepo {
    pub fn new() -> ImagesRepo {
        ImagesRepo {
            root:      RootChain::new(RepoName::Images),
            timestamp: None,
            snapshot:  None,
            targets:   None,
        }
    }

    /// Return the in-memory view to a blank state so verification can be
    /// replayed from storage at the start of each iteration.
    pub fn reset_meta(&mut self) {
        self.root.reset();
        self.timestamp = None;
        self.snapshot = None;
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

    fn parse_role(&self, role: RoleName, bytes: &[u8]) -> Result<RoleData, Error> {
        let signed = json::from_slice::<TufSigned>(bytes)?;
        self.root.verifier()?.verify_signed(role, &signed)?;
        let data = json::from_value::<RoleData>(signed.signed)?;
        if data._type != role {
            return Err(Error::TufRole(format!("expected {}, got {}", role, data._type)));
        }
        Ok(data)
    }

    pub fn verify_timestamp(&mut self, bytes: &[u8], local_version: u64) -> Result<Verified, Error> {
        let data = self.parse_role(RoleName::Timestamp, bytes)?;
        if data.version < local_version {
            return Err(Error::RollbackAttack(format!("timestamp version {} < local {}",
                                                     data.version, local_version)));
        } else if data.expired() {
            return Err(Error::ExpiredMetadata("repo timestamp".into()));
        }
        let verified = Verified { data: data.clone(), new_ver: data.version, old_ver: local_version };
        self.timestamp = Some(data);
        Ok(verified)
    }

    /// Verify a Snapshot document: signatures first, then the structural
    /// checks against the Timestamp pin and locally known role versions.
    pub fn verify_snapshot(&mut self, bytes: &[u8], local_version: u64, local_targets_version: u64)
                           -> Result<Verified, Error> {
        let data = self.parse_role(RoleName::Snapshot, bytes)?;

        if let Some(pin) = self.timestamp.as_ref().and_then(|ts| ts.meta.as_ref())
                               .and_then(|meta| meta.get("snapshot.json")) {
            if let Some(expected) = pin.hashes.get("sha256") {
                let mut hasher = Sha256::new();
                hasher.input(bytes);
                let computed = hasher.result_str();
                if &computed != expected {
                    return Err(Error::BadSignatures(format!("snapshot hash {} doesn't match timestamp pin {}",
                                                            computed, expected)));
                }
            }
            if let Some(version) = pin.version {
                if data.version < version {
                    return Err(Error::RollbackAttack(format!("snapshot version {} below timestamp pin {}",
                                                             data.version, version)));
                }
            }
        }

        if data.version < local_version {
            return Err(Error::RollbackAttack(format!("snapshot version {} < local {}",
                                                     data.version, local_version)));
        }
        if let Some(ref meta) = data.meta {
            for (name, pin) in meta {
                let local = match name.as_str() {
                    "root.json"    => self.root.version(),
                    "targets.json" => local_targets_version,
                    _ => continue
                };
                if let Some(version) = pin.version {
                    if version < local {
                        return Err(Error::RollbackAttack(format!("snapshot lists {} v{} below local v{}",
                                                                 name, version, local)));
                    }
                }
            }
        }
        if data.expired() {
            return Err(Error::ExpiredMetadata("repo snapshot".into()));
        }

        let verified = Verified { data: data.clone(), new_ver: data.version, old_ver: local_version };
        self.snapshot = Some(data);
        Ok(verified)
    }

    pub fn verify_targets(&mut self, bytes: &[u8], local_version: u64) -> Result<Verified, Error> {
        let data = self.parse_role(RoleName::Targets, bytes)?;

        if let Some(pin) = self.snapshot.as_ref().and_then(|snap| snap.meta.as_ref())
                               .and_then(|meta| meta.get("targets.json")) {
            match pin.version {
                Some(version) if version == data.version => (),
                Some(version) => {
                    return Err(Error::RollbackAttack(format!("targets version {} doesn't match snapshot pin {}",
                                                             data.version, version)));
                }
                None => ()
            }
        }

        if data.version < local_version {
            return Err(Error::RollbackAttack(format!("repo targets version {} < local {}",
                                                     data.version, local_version)));
        } else if data.expired() {
            return Err(Error::ExpiredMetadata("repo targets".into()));
        }

        let verified = Verified { data: data.clone(), new_ver: data.version, old_ver: local_version };
        self.targets = Some(data);
        Ok(verified)
    }

    /// Look up the Images-side description of a Director target. The two
    /// repositories must agree on filename, length and every common hash.
    pub fn get_target(&self, director_target: &Target) -> Result<Option<Target>, Error> {
        let targets = self.targets.as_ref().and_then(|data| data.targets.as_ref())
            .ok_or_else(|| Error::MissingRepo("no repo targets metadata".into()))?;
        let meta = match targets.get(&director_target.filename) {
            Some(meta) => meta,
            None => return Ok(None)
        };
        let target = Target::from_meta(director_target.filename.clone(), meta.clone());

        if target.length != director_target.length {
            return Err(Error::MismatchedTargets(format!("{}: length {} vs {}", target.filename,
                                                        director_target.length, target.length)));
        }
        let mut common = 0;
        for (algo, digest) in &director_target.hashes {
            if let Some(theirs) = target.hashes.get(algo) {
                if theirs != digest {
                    return Err(Error::MismatchedTargets(format!("{}: {} hash disagrees", target.filename, algo)));
                }
                common += 1;
            }
        }
        if common == 0 {
            return Err(Error::MismatchedTargets(format!("{}: no common hash algorithm", target.filename)));
        }
        Ok(Some(target))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json as json;

    use datatype::RoleName;
    use uptane::test_meta::{RootKeys, meta_entry, role_body, sha256_hex, signed_root,
                            targets_entry, with_field};


    struct Chain {
        keys: RootKeys,
        repo: ImagesRepo,
    }

    impl Chain {
        fn new() -> Chain {
            let keys = RootKeys::generate(1);
            let mut repo = ImagesRepo::new();
            repo.init_root(&signed_root(&keys, &keys, 1, false)).expect("init root");
            Chain { keys: keys, repo: repo }
        }

        fn targets_bytes(&self, version: u64) -> Vec<u8> {
            let mut entries = json::Map::new();
            entries.insert("ecu1.img".into(), targets_entry(66, "aabb", &[]));
            let body = with_field(role_body(RoleName::Targets, version, false), "targets",
                                  json::Value::Object(entries));
            json::to_vec(&self.keys.sign(body)).expect("targets")
        }

        fn snapshot_bytes(&self, version: u64, targets_version: u64) -> Vec<u8> {
            let mut meta = json::Map::new();
            meta.insert("targets.json".into(), meta_entry(0, None, targets_version));
            let body = with_field(role_body(RoleName::Snapshot, version, false), "meta",
                                  json::Value::Object(meta));
            json::to_vec(&self.keys.sign(body)).expect("snapshot")
        }

        fn timestamp_bytes(&self, version: u64, snapshot: &[u8], snapshot_version: u64) -> Vec<u8> {
            let mut meta = json::Map::new();
            meta.insert("snapshot.json".into(),
                        meta_entry(snapshot.len() as u64, Some(&sha256_hex(snapshot)), snapshot_version));
            let body = with_field(role_body(RoleName::Timestamp, version, false), "meta",
                                  json::Value::Object(meta));
            json::to_vec(&self.keys.sign(body)).expect("timestamp")
        }
    }

    #[test]
    fn full_chain_verifies_in_order() {
        let mut chain = Chain::new();
        let targets = chain.targets_bytes(4);
        let snapshot = chain.snapshot_bytes(3, 4);
        let timestamp = chain.timestamp_bytes(2, &snapshot, 3);

        chain.repo.verify_timestamp(&timestamp, 0).expect("timestamp");
        chain.repo.verify_snapshot(&snapshot, 0, 0).expect("snapshot");
        chain.repo.verify_targets(&targets, 0).expect("targets");
    }

    #[test]
    fn snapshot_hash_must_match_timestamp_pin() {
        let mut chain = Chain::new();
        let snapshot = chain.snapshot_bytes(3, 4);
        let other = chain.snapshot_bytes(30, 4);
        let timestamp = chain.timestamp_bytes(2, &other, 3);

        chain.repo.verify_timestamp(&timestamp, 0).expect("timestamp");
        assert!(chain.repo.verify_snapshot(&snapshot, 0, 0).is_err());
    }

    #[test]
    fn snapshot_below_timestamp_pin_rejected() {
        let mut chain = Chain::new();
        let snapshot = chain.snapshot_bytes(2, 4);
        let timestamp = chain.timestamp_bytes(2, &snapshot, 3);

        chain.repo.verify_timestamp(&timestamp, 0).expect("timestamp");
        match chain.repo.verify_snapshot(&snapshot, 0, 0) {
            Err(Error::RollbackAttack(_)) => (),
            other => panic!("expected RollbackAttack, got {:?}", other.map(|_| ()))
        }
    }

    #[test]
    fn snapshot_listing_below_local_rejected() {
        let mut chain = Chain::new();
        let snapshot = chain.snapshot_bytes(3, 4);
        let timestamp = chain.timestamp_bytes(2, &snapshot, 3);

        chain.repo.verify_timestamp(&timestamp, 0).expect("timestamp");
        // local targets version is already at 5, snapshot lists 4
        match chain.repo.verify_snapshot(&snapshot, 0, 5) {
            Err(Error::RollbackAttack(_)) => (),
            other => panic!("expected RollbackAttack, got {:?}", other.map(|_| ()))
        }
    }

    #[test]
    fn targets_must_match_snapshot_pin() {
        let mut chain = Chain::new();
        let targets = chain.targets_bytes(5);
        let snapshot = chain.snapshot_bytes(3, 4);
        let timestamp = chain.timestamp_bytes(2, &snapshot, 3);

        chain.repo.verify_timestamp(&timestamp, 0).expect("timestamp");
        chain.repo.verify_snapshot(&snapshot, 0, 0).expect("snapshot");
        match chain.repo.verify_targets(&targets, 0) {
            Err(Error::RollbackAttack(_)) => (),
            other => panic!("expected RollbackAttack, got {:?}", other.map(|_| ()))
        }
    }

    #[test]
    fn get_target_requires_full_agreement() {
        let mut chain = Chain::new();
        let targets = chain.targets_bytes(4);
        let snapshot = chain.snapshot_bytes(3, 4);
        let timestamp = chain.timestamp_bytes(2, &snapshot, 3);
        chain.repo.verify_timestamp(&timestamp, 0).expect("timestamp");
        chain.repo.verify_snapshot(&snapshot, 0, 0).expect("snapshot");
        chain.repo.verify_targets(&targets, 0).expect("targets");

        let mut director = Target {
            filename: "ecu1.img".into(),
            length:   66,
            hashes:   hashmap!{"sha256".to_string() => "aabb".to_string()},
            custom:   None,
        };
        let found = chain.repo.get_target(&director).expect("lookup").expect("present");
        assert_eq!(found.filename, "ecu1.img");

        director.length = 67;
        assert!(chain.repo.get_target(&director).is_err());
        director.length = 66;
        director.hashes.insert("sha256".into(), "ffff".into());
        assert!(chain.repo.get_target(&director).is_err());
        director.hashes = hashmap!{"md5".to_string() => "aabb".to_string()};
        assert!(chain.repo.get_target(&director).is_err());

        director.filename = "absent.img".into();
        director.hashes = hashmap!{"sha256".to_string() => "aabb".to_string()};
        assert!(chain.repo.get_target(&director).expect("lookup").is_none());
    }
}
