use crypto::ed25519;
use ring::rand::{SecureRandom, SystemRandom};
use serde_json as json;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use datatype::{EcuSerial, Error, HardwareId, Key, KeyType, KeyValue, PrivateKey, RoleData,
               SecondaryConfig, SignatureType, TufSigned, Util, extract_version};
use secondary::{MetaPack, Secondary};


/// A file-backed in-process secondary. It persists whatever the primary
/// delivers and signs its own version reports, which makes it both the
/// production implementation for virtual ECUs and the reference double in
/// tests.
pub struct VirtualSecondary {
    serial:   EcuSerial,
    hw_id:    HardwareId,
    dir:      PathBuf,
    priv_key: PrivateKey,
    key:      Key,
}

impl VirtualSecondary {
    pub fn new(config: &SecondaryConfig) -> Result<VirtualSecondary, Error> {
        let dir = PathBuf::from(&config.full_client_dir);
        fs::create_dir_all(dir.join("metadata"))?;
        let (priv_key, key) = VirtualSecondary::load_or_generate_keys(&dir)?;
        Ok(VirtualSecondary {
            serial:   config.ecu_serial.clone(),
            hw_id:    config.ecu_hardware_id.clone(),
            dir:      dir,
            priv_key: priv_key,
            key:      key,
        })
    }

    /// Replace the registered public key, for exercising verification failures.
    pub fn set_public_key(&mut self, key: Key) {
        self.key = key;
    }

    pub fn public_key_value(&self) -> Key {
        self.key.clone()
    }

    fn load_or_generate_keys(dir: &PathBuf) -> Result<(PrivateKey, Key), Error> {
        let priv_path = dir.join("sec.priv");
        let pub_path = dir.join("sec.pub");
        if priv_path.is_file() && pub_path.is_file() {
            let der_key = Util::read_file(&priv_path)?;
            let public = String::from_utf8(Util::read_file(&pub_path)?)?;
            let key = Key { keytype: KeyType::Ed25519, keyval: KeyValue { public: public } };
            return Ok((PrivateKey { keyid: key.key_id()?, der_key: der_key }, key));
        }

        let mut seed = [0u8; 32];
        SystemRandom::new().fill(&mut seed)
            .map_err(|_| Error::KeySign("system RNG unavailable".into()))?;
        let (priv_key, pub_key) = ed25519::keypair(&seed);
        let key = Key { keytype: KeyType::Ed25519, keyval: KeyValue { public: ::hex::encode(&pub_key[..]) } };
        Util::write_file(&priv_path, &priv_key)?;
        Util::write_file(&pub_path, key.keyval.public.as_bytes())?;
        Ok((PrivateKey { keyid: key.key_id()?, der_key: priv_key.to_vec() }, key))
    }

    fn root_version_path(&self, director: bool) -> PathBuf {
        if director {
            self.dir.join("metadata").join("director_root_version")
        } else {
            self.dir.join("metadata").join("image_root_version")
        }
    }

    fn installed_name(&self) -> String {
        Util::read_file(&self.dir.join("target_name")).ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| "noimage".into())
    }

    /// Remember which target the Director assigned to this ECU so the next
    /// firmware delivery can be named in the version report.
    fn record_assigned_target(&self, director_targets: &[u8]) -> Result<(), Error> {
        let signed = json::from_slice::<TufSigned>(director_targets)?;
        let data = json::from_value::<RoleData>(signed.signed)?;
        if let Some(targets) = data.targets {
            for (filename, meta) in targets {
                let ecus = meta.custom.as_ref().and_then(|c| c.ecuIdentifiers.as_ref());
                if ecus.map_or(false, |ids| ids.contains_key(&self.serial)) {
                    Util::write_file(&self.dir.join("target_name"), filename.as_bytes())?;
                }
            }
        }
        Ok(())
    }
}

impl Secondary for VirtualSecondary {
    fn serial(&self) -> EcuSerial {
        self.serial.clone()
    }

    fn hw_id(&self) -> HardwareId {
        self.hw_id.clone()
    }

    fn public_key(&self) -> Result<Key, Error> {
        Ok(self.key.clone())
    }

    fn manifest(&self) -> Result<TufSigned, Error> {
        let filepath = self.installed_name();
        let (length, hashes) = match Util::read_file(&self.dir.join("firmware.bin")) {
            Ok(firmware) => {
                let mut hashes = HashMap::new();
                hashes.insert("sha256".to_string(), Util::sha256_hex(&firmware));
                (firmware.len() as u64, hashes)
            }
            Err(_) => (0, HashMap::new())
        };
        let report = ::datatype::EcuVersion::from_target(self.serial.clone(), filepath, length, hashes, None);
        self.priv_key.sign_data(json::to_value(report)?, SignatureType::Ed25519)
    }

    fn root_version(&self, director: bool) -> i64 {
        Util::read_file(&self.root_version_path(director)).ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|text| text.parse().ok())
            .unwrap_or(-1)
    }

    fn put_root(&mut self, bytes: &[u8], director: bool) -> Result<(), Error> {
        let version = extract_version(bytes)?;
        let current = self.root_version(director);
        if current >= 0 && version != current as u64 + 1 {
            return Err(Error::Secondary(format!("{} root version skips from {} to {}",
                                                self.serial, current, version)));
        }
        let repo = if director { "director" } else { "repo" };
        Util::write_file(&self.dir.join("metadata").join(format!("{}.{}.root.json", repo, version)), bytes)?;
        Util::write_file(&self.root_version_path(director), format!("{}", version).as_bytes())
    }

    fn put_metadata(&mut self, meta: &MetaPack) -> Result<(), Error> {
        let dir = self.dir.join("metadata");
        Util::write_file(&dir.join("director.root.json"), &meta.director_root)?;
        Util::write_file(&dir.join("director.targets.json"), &meta.director_targets)?;
        Util::write_file(&dir.join("repo.root.json"), &meta.image_root)?;
        Util::write_file(&dir.join("repo.timestamp.json"), &meta.image_timestamp)?;
        Util::write_file(&dir.join("repo.snapshot.json"), &meta.image_snapshot)?;
        Util::write_file(&dir.join("repo.targets.json"), &meta.image_targets)?;
        self.record_assigned_target(&meta.director_targets)
    }

    fn send_firmware(&mut self, image: &[u8]) -> Result<(), Error> {
        Util::write_file(&self.dir.join("firmware.bin"), image)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use datatype::SecondaryKind;
    use uptane::test_meta::{RootKeys, signed_root};
    use uptane::verify_report;


    fn config(dir: &::std::path::Path) -> SecondaryConfig {
        SecondaryConfig {
            kind:              SecondaryKind::Virtual,
            ecu_serial:        "secondary-serial".parse().unwrap(),
            ecu_hardware_id:   "secondary-hw".parse().unwrap(),
            partial_verifying: false,
            full_client_dir:   dir.to_string_lossy().into_owned(),
            metadata_path:     "".into(),
            firmware_path:     "".into(),
            target_name_path:  "".into(),
        }
    }

    #[test]
    fn keys_persist_across_instances() {
        let dir = tempdir().unwrap();
        let first = VirtualSecondary::new(&config(dir.path())).unwrap();
        let second = VirtualSecondary::new(&config(dir.path())).unwrap();
        assert_eq!(first.public_key().unwrap(), second.public_key().unwrap());
    }

    #[test]
    fn manifest_verifies_under_own_key() {
        let dir = tempdir().unwrap();
        let mut sec = VirtualSecondary::new(&config(dir.path())).unwrap();
        sec.send_firmware(b"firmware").unwrap();
        let report = sec.manifest().unwrap();
        assert!(verify_report(&sec.public_key().unwrap(), &report));
    }

    #[test]
    fn root_versions_applied_in_order() {
        let dir = tempdir().unwrap();
        let mut sec = VirtualSecondary::new(&config(dir.path())).unwrap();
        assert_eq!(sec.root_version(true), -1);
        let keys = RootKeys::generate(1);
        sec.put_root(&signed_root(&keys, &keys, 1, false), true).unwrap();
        sec.put_root(&signed_root(&keys, &keys, 2, false), true).unwrap();
        assert_eq!(sec.root_version(true), 2);
        // skipping a version is refused
        assert!(sec.put_root(&signed_root(&keys, &keys, 4, false), true).is_err());
        // the images chain is tracked separately
        assert_eq!(sec.root_version(false), -1);
    }
}
