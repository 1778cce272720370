pub mod fs;
pub mod sql;

pub use self::fs::FsStorage;
pub use self::sql::SqlStorage;

use std::io::Read;
use std::path::Path;

use datatype::{EcuRecord, Error, InstalledVersion, MisconfiguredEcu, RepoName, RoleName,
               StorageConfig, StorageKind};


/// The TLS credential triple, stored and loaded with all-or-nothing semantics.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TlsCreds {
    pub ca:   Vec<u8>,
    pub cert: Vec<u8>,
    pub pkey: Vec<u8>,
}


/// An exclusive handle for writing a pre-allocated target file. The image
/// only becomes visible to readers after an explicit `commit`, and only when
/// exactly the declared number of bytes was written.
pub trait TargetWriter {
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), Error>;
    fn commit(self: Box<Self>) -> Result<(), Error>;
    fn abort(self: Box<Self>) -> Result<(), Error>;
}


/// Crash-safe persistence of role metadata, device identity, credentials, the
/// ECU roster, the installed-version log and downloaded target files.
///
/// Writes are atomic: after any successful `store_*` call a reader either
/// observes the previous state or the new one, never a mix.
pub trait Storage: Send {
    /// Persist a role document. Non-Root roles keep only the latest version
    /// and storing an older version is a no-op; each Root version is kept.
    fn store_role(&mut self, repo: RepoName, role: RoleName, version: u64, data: &[u8]) -> Result<(), Error>;
    /// Load a specific version of a role document, or the latest when `None`.
    fn load_role(&self, repo: RepoName, role: RoleName, version: Option<u64>) -> Result<Option<Vec<u8>>, Error>;
    /// Drop all non-Root metadata for a repository, after a Root rotation.
    fn clear_non_root_meta(&mut self, repo: RepoName) -> Result<(), Error>;
    fn clear_metadata(&mut self) -> Result<(), Error>;

    fn store_tls_creds(&mut self, creds: &TlsCreds) -> Result<(), Error>;
    fn load_tls_creds(&self) -> Result<Option<TlsCreds>, Error>;
    fn clear_tls_creds(&mut self) -> Result<(), Error>;

    fn store_primary_keys(&mut self, public: &[u8], private: &[u8]) -> Result<(), Error>;
    fn load_primary_keys(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error>;

    fn store_device_id(&mut self, device_id: &str) -> Result<(), Error>;
    fn load_device_id(&self) -> Result<Option<String>, Error>;
    fn store_ecu_registered(&mut self) -> Result<(), Error>;
    fn load_ecu_registered(&self) -> Result<bool, Error>;

    /// Replace the provisioned ECU roster. The first record is the primary.
    fn store_ecu_serials(&mut self, ecus: &[EcuRecord]) -> Result<(), Error>;
    fn load_ecu_serials(&self) -> Result<Vec<EcuRecord>, Error>;
    fn store_misconfigured_ecus(&mut self, ecus: &[MisconfiguredEcu]) -> Result<(), Error>;
    fn load_misconfigured_ecus(&self) -> Result<Vec<MisconfiguredEcu>, Error>;

    fn append_installed_version(&mut self, version: &InstalledVersion) -> Result<(), Error>;
    fn load_installed_versions(&self) -> Result<Vec<InstalledVersion>, Error>;

    /// Pre-allocate a download slot for a target image of a known size.
    fn allocate_target_file(&mut self, from_director: bool, filename: &str, size: u64) -> Result<Box<TargetWriter>, Error>;
    /// Open a committed target image for sequential reading.
    fn open_target_file(&self, filename: &str) -> Result<Box<Read>, Error>;
    fn remove_target_file(&mut self, filename: &str) -> Result<(), Error>;

    fn kind(&self) -> StorageKind;
}


/// Open the configured storage backend. Opening a SQL store over a directory
/// holding a legacy filesystem layout ingests that layout first.
pub fn open_storage(config: &StorageConfig) -> Result<Box<Storage>, Error> {
    match config.kind {
        StorageKind::Filesystem => Ok(Box::new(FsStorage::new(&config.path)?)),

        StorageKind::Sqlite => {
            let path = Path::new(&config.path);
            let db_path = if path.extension().is_some() {
                path.to_path_buf()
            } else {
                path.join("sql.db")
            };
            let mut sql = SqlStorage::open(&db_path)?;
            let dir = db_path.parent().map(Path::to_path_buf)
                .unwrap_or_else(|| path.to_path_buf());
            if fs::legacy_layout_present(&dir) {
                info!("found legacy filesystem storage in {:?}, migrating", dir);
                sql::migrate_fs_to_sql(&dir, &mut sql)?;
            }
            Ok(Box::new(sql))
        }
    }
}
