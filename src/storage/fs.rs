use serde_json as json;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use datatype::{EcuRecord, EcuRole, Error, InstalledVersion, MisconfiguredEcu, RepoName,
               RoleName, StorageKind, Util, extract_version};
use storage::{Storage, TargetWriter, TlsCreds};


const TLS_CA:     &'static str = "ca.pem";
const TLS_CERT:   &'static str = "client.pem";
const TLS_PKEY:   &'static str = "pkey.pem";
const PRIV_KEY:   &'static str = "uptane_private_key";
const PUB_KEY:    &'static str = "uptane_public_key";
const DEVICE_ID:  &'static str = "device_id";
const REGISTERED: &'static str = "is_registered";
const PRIMARY_SERIAL: &'static str = "primary_ecu_serial";
const PRIMARY_HW_ID:  &'static str = "primary_ecu_hardware_id";
const SECONDARIES:    &'static str = "secondaries_list";
const MISCONFIGURED:  &'static str = "misconfigured_ecus";
const INSTALLED:      &'static str = "installed_versions";


/// Directory-rooted storage with the layout:
///
/// ```text
/// <path>/metadata/director/{N}.root.json, root.json, targets.json
/// <path>/metadata/repo/{N}.root.json, root.json, timestamp.json, snapshot.json, targets.json
/// <path>/targets/<filename>
/// <path>/ca.pem, client.pem, pkey.pem, uptane_private_key, uptane_public_key, ...
/// ```
pub struct FsStorage {
    path: PathBuf,
}

/// Whether a directory holds a legacy filesystem layout worth migrating.
pub fn legacy_layout_present(dir: &Path) -> bool {
    dir.join("metadata").is_dir() || dir.join(DEVICE_ID).is_file() || dir.join(PRIV_KEY).is_file()
}

impl FsStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<FsStorage, Error> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(path.join("metadata/director"))?;
        fs::create_dir_all(path.join("metadata/repo"))?;
        fs::create_dir_all(path.join("targets"))?;
        Ok(FsStorage { path: path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn meta_dir(&self, repo: RepoName) -> PathBuf {
        self.path.join("metadata").join(format!("{}", repo))
    }

    fn target_path(&self, filename: &str) -> PathBuf {
        self.path.join("targets").join(filename)
    }

    fn read_opt(&self, name: &str) -> Result<Option<Vec<u8>>, Error> {
        let path = self.path.join(name);
        if path.is_file() {
            Ok(Some(Util::read_file(&path)?))
        } else {
            Ok(None)
        }
    }

    fn current_version(&self, repo: RepoName, role: RoleName) -> Result<Option<u64>, Error> {
        let path = self.meta_dir(repo).join(role.filename());
        if ! path.is_file() {
            return Ok(None);
        }
        Ok(Some(extract_version(&Util::read_file(&path)?)?))
    }
}

impl Storage for FsStorage {
    fn store_role(&mut self, repo: RepoName, role: RoleName, version: u64, data: &[u8]) -> Result<(), Error> {
        if let Some(current) = self.current_version(repo, role)? {
            if version < current {
                trace!("not storing {} {} v{}: v{} already stored", repo, role, version, current);
                return Ok(());
            }
        }
        let dir = self.meta_dir(repo);
        if role == RoleName::Root {
            Util::write_atomic(dir.join(format!("{}.{}", version, role.filename())), data)?;
        }
        Util::write_atomic(dir.join(role.filename()), data)
    }

    fn load_role(&self, repo: RepoName, role: RoleName, version: Option<u64>) -> Result<Option<Vec<u8>>, Error> {
        let dir = self.meta_dir(repo);
        let path = match version {
            Some(version) if role == RoleName::Root => dir.join(format!("{}.{}", version, role.filename())),
            Some(version) => {
                match self.current_version(repo, role)? {
                    Some(current) if current == version => dir.join(role.filename()),
                    _ => return Ok(None)
                }
            }
            None => dir.join(role.filename()),
        };
        if path.is_file() {
            Ok(Some(Util::read_file(&path)?))
        } else {
            Ok(None)
        }
    }

    fn clear_non_root_meta(&mut self, repo: RepoName) -> Result<(), Error> {
        for role in &[RoleName::Targets, RoleName::Timestamp, RoleName::Snapshot] {
            let path = self.meta_dir(repo).join(role.filename());
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn clear_metadata(&mut self) -> Result<(), Error> {
        let dir = self.path.join("metadata");
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(self.path.join("metadata/director"))?;
        fs::create_dir_all(self.path.join("metadata/repo"))?;
        Ok(())
    }

    fn store_tls_creds(&mut self, creds: &TlsCreds) -> Result<(), Error> {
        let outcome = Util::write_atomic(self.path.join(TLS_CA), &creds.ca)
            .and_then(|_| Util::write_atomic(self.path.join(TLS_CERT), &creds.cert))
            .and_then(|_| Util::write_atomic(self.path.join(TLS_PKEY), &creds.pkey));
        if outcome.is_err() {
            let _ = self.clear_tls_creds();
        }
        outcome
    }

    fn load_tls_creds(&self) -> Result<Option<TlsCreds>, Error> {
        match (self.read_opt(TLS_CA)?, self.read_opt(TLS_CERT)?, self.read_opt(TLS_PKEY)?) {
            (Some(ca), Some(cert), Some(pkey)) => Ok(Some(TlsCreds { ca: ca, cert: cert, pkey: pkey })),
            _ => Ok(None)
        }
    }

    fn clear_tls_creds(&mut self) -> Result<(), Error> {
        for name in &[TLS_CA, TLS_CERT, TLS_PKEY] {
            let path = self.path.join(name);
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn store_primary_keys(&mut self, public: &[u8], private: &[u8]) -> Result<(), Error> {
        Util::write_atomic(self.path.join(PUB_KEY), public)?;
        Util::write_atomic(self.path.join(PRIV_KEY), private)
    }

    fn load_primary_keys(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error> {
        match (self.read_opt(PUB_KEY)?, self.read_opt(PRIV_KEY)?) {
            (Some(public), Some(private)) => Ok(Some((public, private))),
            _ => Ok(None)
        }
    }

    fn store_device_id(&mut self, device_id: &str) -> Result<(), Error> {
        Util::write_atomic(self.path.join(DEVICE_ID), device_id.as_bytes())
    }

    fn load_device_id(&self) -> Result<Option<String>, Error> {
        Ok(match self.read_opt(DEVICE_ID)? {
            Some(bytes) => Some(String::from_utf8(bytes)?),
            None => None
        })
    }

    fn store_ecu_registered(&mut self) -> Result<(), Error> {
        Util::write_atomic(self.path.join(REGISTERED), b"1")
    }

    fn load_ecu_registered(&self) -> Result<bool, Error> {
        Ok(self.path.join(REGISTERED).is_file())
    }

    fn store_ecu_serials(&mut self, ecus: &[EcuRecord]) -> Result<(), Error> {
        let primary = ecus.iter().find(|ecu| ecu.is_primary)
            .ok_or_else(|| Error::InvariantViolation("roster has no primary".into()))?;
        Util::write_atomic(self.path.join(PRIMARY_SERIAL), primary.serial.as_str().as_bytes())?;
        Util::write_atomic(self.path.join(PRIMARY_HW_ID), primary.hw_id.as_str().as_bytes())?;
        let secondaries = ecus.iter().filter(|ecu| !ecu.is_primary).collect::<Vec<_>>();
        Util::write_atomic(self.path.join(SECONDARIES), &json::to_vec(&secondaries)?)
    }

    fn load_ecu_serials(&self) -> Result<Vec<EcuRecord>, Error> {
        let serial = match self.read_opt(PRIMARY_SERIAL)? {
            Some(bytes) => String::from_utf8(bytes)?,
            None => return Ok(Vec::new())
        };
        let hw_id = match self.read_opt(PRIMARY_HW_ID)? {
            Some(bytes) => String::from_utf8(bytes)?,
            None => return Ok(Vec::new())
        };
        let mut ecus = vec![EcuRecord {
            serial:     serial.parse()?,
            hw_id:      hw_id.parse()?,
            is_primary: true,
            public_key: None,
            role:       EcuRole::UptaneFull,
            transport:  None,
        }];
        if let Some(bytes) = self.read_opt(SECONDARIES)? {
            ecus.extend(json::from_slice::<Vec<EcuRecord>>(&bytes)?);
        }
        Ok(ecus)
    }

    fn store_misconfigured_ecus(&mut self, ecus: &[MisconfiguredEcu]) -> Result<(), Error> {
        Util::write_atomic(self.path.join(MISCONFIGURED), &json::to_vec(&ecus)?)
    }

    fn load_misconfigured_ecus(&self) -> Result<Vec<MisconfiguredEcu>, Error> {
        match self.read_opt(MISCONFIGURED)? {
            Some(bytes) => Ok(json::from_slice(&bytes)?),
            None => Ok(Vec::new())
        }
    }

    fn append_installed_version(&mut self, version: &InstalledVersion) -> Result<(), Error> {
        let mut installed: HashMap<String, InstalledVersion> = match self.read_opt(INSTALLED)? {
            Some(bytes) => json::from_slice(&bytes)?,
            None => HashMap::new()
        };
        installed.insert(version.filename.clone(), version.clone());
        Util::write_atomic(self.path.join(INSTALLED), &json::to_vec(&installed)?)
    }

    fn load_installed_versions(&self) -> Result<Vec<InstalledVersion>, Error> {
        let installed: HashMap<String, InstalledVersion> = match self.read_opt(INSTALLED)? {
            Some(bytes) => json::from_slice(&bytes)?,
            None => return Ok(Vec::new())
        };
        let mut versions = installed.into_iter().map(|(_, v)| v).collect::<Vec<_>>();
        versions.sort_by(|a, b| a.installed_at.cmp(&b.installed_at));
        Ok(versions)
    }

    fn allocate_target_file(&mut self, from_director: bool, filename: &str, size: u64) -> Result<Box<TargetWriter>, Error> {
        trace!("allocating {} bytes for {} (director: {})", size, filename, from_director);
        let path = self.target_path(filename);
        let part = self.path.join("targets").join(format!(".{}.part", filename));
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&part)?;
        Ok(Box::new(FsTargetWriter {
            file:     file,
            part:     part,
            path:     path,
            expected: size,
            written:  0,
        }))
    }

    fn open_target_file(&self, filename: &str) -> Result<Box<Read>, Error> {
        let path = self.target_path(filename);
        if ! path.is_file() {
            return Err(Error::NotFound(format!("no target file {}", filename)));
        }
        Ok(Box::new(File::open(&path)?))
    }

    fn remove_target_file(&mut self, filename: &str) -> Result<(), Error> {
        let path = self.target_path(filename);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Filesystem
    }
}


struct FsTargetWriter {
    file:     File,
    part:     PathBuf,
    path:     PathBuf,
    expected: u64,
    written:  u64,
}

impl TargetWriter for FsTargetWriter {
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.written + data.len() as u64 > self.expected {
            return Err(Error::TooLarge(format!("target exceeds declared length of {} bytes", self.expected)));
        }
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), Error> {
        if self.written != self.expected {
            let _ = fs::remove_file(&self.part);
            return Err(Error::Storage(format!("target is {} bytes, expected {}", self.written, self.expected)));
        }
        self.file.flush()?;
        fs::rename(&self.part, &self.path)?;
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<(), Error> {
        fs::remove_file(&self.part)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use datatype::HardwareId;


    fn role_bytes(role: &str, version: u64) -> Vec<u8> {
        format!(r#"{{"signatures":[],"signed":{{"_type":"{}","expires":"2038-01-19T03:14:06Z","version":{}}}}}"#,
                role, version).into_bytes()
    }

    #[test]
    fn root_versions_all_retained() {
        let dir = tempdir().unwrap();
        let mut store = FsStorage::new(dir.path()).unwrap();
        for version in 1..4 {
            store.store_role(RepoName::Director, RoleName::Root, version, &role_bytes("Root", version)).unwrap();
        }
        let latest = store.load_role(RepoName::Director, RoleName::Root, None).unwrap().unwrap();
        assert_eq!(extract_version(&latest).unwrap(), 3);
        for version in 1..4 {
            let bytes = store.load_role(RepoName::Director, RoleName::Root, Some(version)).unwrap().unwrap();
            assert_eq!(extract_version(&bytes).unwrap(), version);
        }
    }

    #[test]
    fn older_non_root_version_is_noop() {
        let dir = tempdir().unwrap();
        let mut store = FsStorage::new(dir.path()).unwrap();
        store.store_role(RepoName::Director, RoleName::Targets, 5, &role_bytes("Targets", 5)).unwrap();
        store.store_role(RepoName::Director, RoleName::Targets, 3, &role_bytes("Targets", 3)).unwrap();
        let bytes = store.load_role(RepoName::Director, RoleName::Targets, None).unwrap().unwrap();
        assert_eq!(extract_version(&bytes).unwrap(), 5);
    }

    #[test]
    fn clear_non_root_keeps_roots() {
        let dir = tempdir().unwrap();
        let mut store = FsStorage::new(dir.path()).unwrap();
        store.store_role(RepoName::Images, RoleName::Root, 1, &role_bytes("Root", 1)).unwrap();
        store.store_role(RepoName::Images, RoleName::Timestamp, 1, &role_bytes("Timestamp", 1)).unwrap();
        store.clear_non_root_meta(RepoName::Images).unwrap();
        assert!(store.load_role(RepoName::Images, RoleName::Timestamp, None).unwrap().is_none());
        assert!(store.load_role(RepoName::Images, RoleName::Root, None).unwrap().is_some());
    }

    #[test]
    fn target_file_not_visible_until_commit() {
        let dir = tempdir().unwrap();
        let mut store = FsStorage::new(dir.path()).unwrap();
        let mut writer = store.allocate_target_file(false, "image.bin", 6).unwrap();
        writer.write_chunk(b"abc").unwrap();
        assert!(store.open_target_file("image.bin").is_err());
        writer.write_chunk(b"def").unwrap();
        writer.commit().unwrap();
        let mut buf = Vec::new();
        store.open_target_file("image.bin").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn oversized_write_rejected() {
        let dir = tempdir().unwrap();
        let mut store = FsStorage::new(dir.path()).unwrap();
        let mut writer = store.allocate_target_file(false, "small.bin", 4).unwrap();
        writer.write_chunk(b"abc").unwrap();
        assert!(writer.write_chunk(b"de").is_err());
        writer.abort().unwrap();
        assert!(store.open_target_file("small.bin").is_err());
    }

    #[test]
    fn short_commit_rejected() {
        let dir = tempdir().unwrap();
        let mut store = FsStorage::new(dir.path()).unwrap();
        let mut writer = store.allocate_target_file(false, "short.bin", 10).unwrap();
        writer.write_chunk(b"abc").unwrap();
        assert!(writer.commit().is_err());
        assert!(store.open_target_file("short.bin").is_err());
    }

    #[test]
    fn roster_round_trip() {
        let dir = tempdir().unwrap();
        let mut store = FsStorage::new(dir.path()).unwrap();
        assert!(store.load_ecu_serials().unwrap().is_empty());
        let ecus = vec![
            EcuRecord {
                serial: "primary".parse().unwrap(), hw_id: HardwareId::from("hw-a"),
                is_primary: true, public_key: None, role: EcuRole::UptaneFull, transport: None,
            },
            EcuRecord {
                serial: "secondary".parse().unwrap(), hw_id: HardwareId::from("hw-b"),
                is_primary: false, public_key: None, role: EcuRole::UptanePartial, transport: None,
            },
        ];
        store.store_ecu_serials(&ecus).unwrap();
        let loaded = store.load_ecu_serials().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].is_primary);
        assert_eq!(loaded[1].serial, "secondary".parse().unwrap());
    }
}
