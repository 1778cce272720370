use std::collections::{HashMap, HashSet};
use std::io::Read;

use datatype::{CryptoSource, EcuRecord, EcuSerial, EcuState, Error, Key, MisconfiguredEcu,
               PacManConfig, RepoName, RoleName, SecondaryPolicy, Target, TlsConfig, TufSigned,
               extract_version};
use http::Client;
use secondary::{MetaPack, Secondary};
use storage::Storage;
use uptane::Fetcher;


/// A uniform channel to the vehicle's secondaries: identity queries, version
/// reports, root-rotation catch-up and metadata/image delivery. A failure
/// against one secondary never aborts the cycle for the others.
pub struct SecondaryBus {
    secondaries: HashMap<EcuSerial, Box<Secondary>>,
    policy:      SecondaryPolicy,
    meta_failed: HashSet<EcuSerial>,
}

impl SecondaryBus {
    pub fn new(policy: SecondaryPolicy) -> SecondaryBus {
        SecondaryBus {
            secondaries: HashMap::new(),
            policy:      policy,
            meta_failed: HashSet::new(),
        }
    }

    pub fn register(&mut self, secondary: Box<Secondary>) {
        let serial = secondary.serial();
        if self.secondaries.contains_key(&serial) {
            error!("multiple secondaries found with the same serial: {}", serial);
            return;
        }
        self.secondaries.insert(serial, secondary);
    }

    pub fn serials(&self) -> Vec<EcuSerial> {
        let mut serials = self.secondaries.keys().cloned().collect::<Vec<_>>();
        serials.sort();
        serials
    }

    pub fn hw_ids(&self) -> HashMap<EcuSerial, ::datatype::HardwareId> {
        self.secondaries.iter().map(|(serial, sec)| (serial.clone(), sec.hw_id())).collect()
    }

    /// Cross-check the reported secondaries against the provisioned roster,
    /// returning the observations that don't line up.
    pub fn verify_against_roster(&self, roster: &[EcuRecord], primary: &EcuSerial) -> Vec<MisconfiguredEcu> {
        let mut misconfigured = Vec::new();
        let mut found = vec![false; roster.len()];

        match roster.iter().position(|ecu| &ecu.serial == primary) {
            Some(idx) => found[idx] = true,
            None => error!("primary ECU serial {} not found in storage", primary),
        }

        for (serial, secondary) in &self.secondaries {
            match roster.iter().position(|ecu| &ecu.serial == serial) {
                Some(idx) if found[idx] => {
                    error!("secondary ECU serial {} has a duplicate entry in storage", serial);
                }
                Some(idx) => found[idx] = true,
                None => {
                    error!("secondary ECU serial {} (hardware ID {}) not found in storage",
                           serial, secondary.hw_id());
                    misconfigured.push(MisconfiguredEcu {
                        serial: serial.clone(),
                        hw_id:  secondary.hw_id(),
                        state:  EcuState::NotRegistered,
                    });
                }
            }
        }

        for (idx, seen) in found.iter().enumerate() {
            if ! seen {
                warn!("ECU serial {} in storage was not reported", roster[idx].serial);
                misconfigured.push(MisconfiguredEcu {
                    serial: roster[idx].serial.clone(),
                    hw_id:  roster[idx].hw_id.clone(),
                    state:  EcuState::Old,
                });
            }
        }
        misconfigured
    }

    /// Gather each secondary's signed version report together with its
    /// registered key, for the manifest builder to verify.
    pub fn collect_reports(&self) -> Vec<(EcuSerial, TufSigned, Option<Key>)> {
        let mut reports = Vec::new();
        for (serial, secondary) in &self.secondaries {
            match secondary.manifest() {
                Ok(report) => reports.push((serial.clone(), report, secondary.public_key().ok())),
                Err(err) => error!("couldn't get manifest from {}: {}", serial, err),
            }
        }
        reports
    }

    /// Walk a secondary through every Root version it is missing, loading
    /// each from storage and falling back to the repository on a miss.
    fn rotate_root(&mut self, serial: &EcuSerial, repo: RepoName, storage: &mut Storage,
                   fetcher: &Fetcher, client: &Client) -> Result<(), Error> {
        let latest = storage.load_role(repo, RoleName::Root, None)?
            .ok_or_else(|| Error::MissingRepo(format!("no {} root metadata to send", repo)))?;
        let latest_version = extract_version(&latest)?;

        let secondary_version = self.secondaries.get(serial)
            .ok_or_else(|| Error::Secondary(format!("unknown secondary {}", serial)))?
            .root_version(repo == RepoName::Director);
        if secondary_version < 0 {
            trace!("secondary {} doesn't track {} root versions", serial, repo);
            return Ok(());
        }

        for version in (secondary_version as u64 + 1)..latest_version + 1 {
            let root = match storage.load_role(repo, RoleName::Root, Some(version))? {
                Some(root) => root,
                None => {
                    warn!("{} root v{} not in storage, trying remote repo", repo, version);
                    fetcher.fetch_role(client, repo, RoleName::Root, Some(version))?
                }
            };
            let secondary = self.secondaries.get_mut(serial).expect("secondary registered");
            secondary.put_root(&root, repo == RepoName::Director)?;
        }
        Ok(())
    }

    /// For each secondary affected by the updates: catch up its Root chains,
    /// then deliver the metadata pack. Failures are recorded and skipped.
    pub fn send_metadata_to_ecus(&mut self, targets: &[Target], storage: &mut Storage,
                                 fetcher: &Fetcher, client: &Client) -> Result<(), Error> {
        self.meta_failed.clear();
        let meta = MetaPack {
            director_root:    load_current(storage, RepoName::Director, RoleName::Root)?,
            director_targets: load_current(storage, RepoName::Director, RoleName::Targets)?,
            image_root:       load_current(storage, RepoName::Images, RoleName::Root)?,
            image_timestamp:  load_current(storage, RepoName::Images, RoleName::Timestamp)?,
            image_snapshot:   load_current(storage, RepoName::Images, RoleName::Snapshot)?,
            image_targets:    load_current(storage, RepoName::Images, RoleName::Targets)?,
        };

        for serial in affected_secondaries(targets, &self.serials()) {
            let outcome = self.rotate_root(&serial, RepoName::Director, storage, fetcher, client)
                .and_then(|_| self.rotate_root(&serial, RepoName::Images, storage, fetcher, client))
                .and_then(|_| {
                    self.secondaries.get_mut(&serial).expect("secondary registered").put_metadata(&meta)
                });
            if let Err(err) = outcome {
                error!("sending metadata to {} failed: {}", serial, err);
                self.meta_failed.insert(serial.clone());
            }
        }
        Ok(())
    }

    /// Deliver each target image to its secondaries. A zero-length target
    /// marks an OSTree ECU, which receives a treehub credentials archive
    /// instead of image bytes.
    pub fn send_images_to_ecus(&mut self, targets: &[Target], storage: &mut Storage,
                               tls: &Option<TlsConfig>, pacman: &PacManConfig) {
        for target in targets {
            for serial in affected_secondaries(&[target.clone()], &self.serials()) {
                if self.policy == SecondaryPolicy::SkipFirmware && self.meta_failed.contains(&serial) {
                    warn!("skipping firmware for {} after metadata failure", serial);
                    continue;
                }

                let firmware = match read_target(storage, &target.filename) {
                    Ok(firmware) => firmware,
                    Err(err) => {
                        error!("couldn't read target {} for {}: {}", target.filename, serial, err);
                        continue;
                    }
                };
                let payload = if firmware.is_empty() {
                    match treehub_credentials(storage, tls, pacman) {
                        Ok(archive) => archive,
                        Err(err) => {
                            error!("couldn't build credentials archive for {}: {}", serial, err);
                            continue;
                        }
                    }
                } else {
                    firmware
                };

                let secondary = self.secondaries.get_mut(&serial).expect("secondary registered");
                if let Err(err) = secondary.send_firmware(&payload) {
                    error!("sending firmware to {} failed: {}", serial, err);
                }
            }
        }
    }
}

fn load_current(storage: &Storage, repo: RepoName, role: RoleName) -> Result<Vec<u8>, Error> {
    storage.load_role(repo, role, None)?
        .ok_or_else(|| Error::MissingRepo(format!("no {} {} metadata to send", repo, role)))
}

fn read_target(storage: &Storage, filename: &str) -> Result<Vec<u8>, Error> {
    let mut data = Vec::new();
    storage.open_target_file(filename)?.read_to_end(&mut data)?;
    Ok(data)
}

/// The registered secondaries named by any of the targets' ecu listings.
fn affected_secondaries(targets: &[Target], known: &[EcuSerial]) -> Vec<EcuSerial> {
    let mut serials = Vec::new();
    for target in targets {
        for (serial, _) in target.ecus() {
            if known.contains(&serial) && !serials.contains(&serial) {
                serials.push(serial);
            }
        }
    }
    serials
}

/// The tar archive an OSTree secondary needs to talk to the treehub on its
/// own: CA bundle, client cert, client key and the remote URL. Only built
/// when all three TLS credential sources are file-backed.
pub fn treehub_credentials(storage: &Storage, tls: &Option<TlsConfig>, pacman: &PacManConfig)
                           -> Result<Vec<u8>, Error> {
    let tls = tls.as_ref().ok_or_else(|| Error::Config("no [tls] section configured".into()))?;
    if tls.ca_source != CryptoSource::File || tls.cert_source != CryptoSource::File
            || tls.pkey_source != CryptoSource::File {
        return Err(Error::Config("credentials archive needs file-backed TLS sources".into()));
    }
    let creds = storage.load_tls_creds()?
        .ok_or_else(|| Error::Storage("no TLS credentials in storage".into()))?;
    let server = pacman.ostree_server.as_ref()
        .ok_or_else(|| Error::Config("pacman.ostree_server not configured".into()))?;

    let mut archive = ::tar::Builder::new(Vec::new());
    let url = format!("{}", server);
    let entries: [(&str, &[u8]); 4] = [
        ("ca.pem",     &creds.ca),
        ("client.pem", &creds.cert),
        ("pkey.pem",   &creds.pkey),
        ("server.url", url.as_bytes()),
    ];
    for &(name, data) in &entries {
        let mut header = ::tar::Header::new_gnu();
        header.set_path(name)?;
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        archive.append(&header, data)?;
    }
    archive.into_inner().map_err(Error::Io)
}


#[cfg(test)]
mod tests {
    use super::*;
    use tar::Archive;
    use tempfile::tempdir;

    use datatype::{EcuRole, HardwareId, SecondaryConfig, SecondaryKind, UptaneConfig};
    use http::TestClient;
    use secondary::VirtualSecondary;
    use storage::{FsStorage, TlsCreds};
    use uptane::Fetcher;
    use uptane::test_meta::{RootKeys, signed_root};


    fn virtual_secondary(dir: &::std::path::Path, serial: &str) -> Box<Secondary> {
        Box::new(VirtualSecondary::new(&SecondaryConfig {
            kind:              SecondaryKind::Virtual,
            ecu_serial:        serial.parse().unwrap(),
            ecu_hardware_id:   "secondary-hw".parse().unwrap(),
            partial_verifying: false,
            full_client_dir:   dir.to_string_lossy().into_owned(),
            metadata_path:     "".into(),
            firmware_path:     "".into(),
            target_name_path:  "".into(),
        }).unwrap())
    }

    #[test]
    fn rotation_catch_up_applies_missing_versions() {
        let dir = tempdir().unwrap();
        let mut storage = FsStorage::new(dir.path().join("storage")).unwrap();
        let keys = RootKeys::generate(1);
        for version in 1..4 {
            storage.store_role(RepoName::Director, RoleName::Root, version,
                               &signed_root(&keys, &keys, version, false)).unwrap();
            storage.store_role(RepoName::Images, RoleName::Root, version,
                               &signed_root(&keys, &keys, version, false)).unwrap();
        }

        let mut bus = SecondaryBus::new(SecondaryPolicy::Continue);
        let sec_dir = dir.path().join("sec");
        bus.register(virtual_secondary(&sec_dir, "sec-1"));
        let serial: EcuSerial = "sec-1".parse().unwrap();

        // seed the secondary at version 1, catch-up should deliver 2 and 3
        {
            let root = storage.load_role(RepoName::Director, RoleName::Root, Some(1)).unwrap().unwrap();
            bus.secondaries.get_mut(&serial).unwrap().put_root(&root, true).unwrap();
        }
        let fetcher = Fetcher::new(&UptaneConfig::default());
        let client = TestClient::default();
        bus.rotate_root(&serial, RepoName::Director, &mut storage, &fetcher, &client).unwrap();
        assert_eq!(bus.secondaries.get(&serial).unwrap().root_version(true), 3);
    }

    #[test]
    fn roster_cross_check_flags_both_directions() {
        let dir = tempdir().unwrap();
        let mut bus = SecondaryBus::new(SecondaryPolicy::Continue);
        bus.register(virtual_secondary(&dir.path().join("sec"), "reported-not-registered"));

        let primary: EcuSerial = "primary".parse().unwrap();
        let roster = vec![
            EcuRecord {
                serial: primary.clone(), hw_id: HardwareId::from("hw-p"),
                is_primary: true, public_key: None, role: EcuRole::UptaneFull, transport: None,
            },
            EcuRecord {
                serial: "registered-not-reported".parse().unwrap(), hw_id: HardwareId::from("hw-s"),
                is_primary: false, public_key: None, role: EcuRole::UptanePartial, transport: None,
            },
        ];
        let misconfigured = bus.verify_against_roster(&roster, &primary);
        assert_eq!(misconfigured.len(), 2);
        assert!(misconfigured.iter().any(|ecu| ecu.state == EcuState::NotRegistered
                                         && ecu.serial == "reported-not-registered".parse().unwrap()));
        assert!(misconfigured.iter().any(|ecu| ecu.state == EcuState::Old
                                         && ecu.serial == "registered-not-reported".parse().unwrap()));
    }

    #[test]
    fn credentials_archive_contents() {
        let dir = tempdir().unwrap();
        let mut storage = FsStorage::new(dir.path()).unwrap();
        storage.store_tls_creds(&TlsCreds {
            ca:   b"ca-bytes".to_vec(),
            cert: b"cert-bytes".to_vec(),
            pkey: b"pkey-bytes".to_vec(),
        }).unwrap();
        let tls = Some(TlsConfig::default());
        let mut pacman = PacManConfig::default();
        pacman.ostree_server = Some("http://treehub.example.com/api".parse().unwrap());

        let bytes = treehub_credentials(&storage, &tls, &pacman).unwrap();
        let mut archive = Archive::new(&bytes[..]);
        let names = archive.entries().unwrap()
            .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["ca.pem", "client.pem", "pkey.pem", "server.url"]);
    }

    #[test]
    fn pkcs11_sources_refuse_archive() {
        let dir = tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();
        let mut tls = TlsConfig::default();
        tls.pkey_source = CryptoSource::Pkcs11;
        assert!(treehub_credentials(&storage, &Some(tls), &PacManConfig::default()).is_err());
    }
}
