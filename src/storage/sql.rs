use chrono::{DateTime, Utc};
use rusqlite::{Connection, DatabaseName, OptionalExtension, params};
use serde_json as json;
use std::fs;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use datatype::{EcuRecord, Error, InstalledVersion, MisconfiguredEcu, RepoName, RoleName,
               StorageKind};
use storage::{FsStorage, Storage, TargetWriter, TlsCreds};


/// Ordered schema migrations; index N upgrades the store to version N+1. Each
/// pending step runs inside a single transaction on open.
const SCHEMA_MIGRATIONS: &'static [&'static str] = &[
    // version 1
    "CREATE TABLE meta (
         repo TEXT NOT NULL,
         role TEXT NOT NULL,
         version INTEGER NOT NULL,
         data BLOB NOT NULL,
         PRIMARY KEY (repo, role, version)
     );
     CREATE TABLE primary_keys (
         unique_mark INTEGER PRIMARY KEY CHECK (unique_mark = 0),
         public BLOB NOT NULL,
         private BLOB NOT NULL
     );
     CREATE TABLE tls_creds (
         unique_mark INTEGER PRIMARY KEY CHECK (unique_mark = 0),
         ca BLOB NOT NULL,
         cert BLOB NOT NULL,
         pkey BLOB NOT NULL
     );
     CREATE TABLE device_info (
         unique_mark INTEGER PRIMARY KEY CHECK (unique_mark = 0),
         device_id TEXT,
         is_registered INTEGER NOT NULL DEFAULT 0
     );
     CREATE TABLE ecu_serials (
         id INTEGER PRIMARY KEY AUTOINCREMENT,
         serial TEXT UNIQUE NOT NULL,
         hw_id TEXT NOT NULL,
         is_primary INTEGER NOT NULL DEFAULT 0,
         public_key TEXT,
         role TEXT NOT NULL,
         transport TEXT
     );
     CREATE TABLE installed_versions (
         id INTEGER PRIMARY KEY AUTOINCREMENT,
         ecu_serial TEXT NOT NULL,
         filename TEXT NOT NULL,
         hashes TEXT NOT NULL,
         length INTEGER NOT NULL,
         installed_at TEXT NOT NULL
     );
     CREATE TABLE target_images (
         filename TEXT PRIMARY KEY,
         from_director INTEGER NOT NULL DEFAULT 0,
         expected INTEGER NOT NULL,
         written INTEGER NOT NULL DEFAULT 0,
         committed INTEGER NOT NULL DEFAULT 0,
         data BLOB NOT NULL
     );",
    // version 2
    "CREATE TABLE misconfigured_ecus (
         serial TEXT NOT NULL,
         hw_id TEXT NOT NULL,
         state TEXT NOT NULL
     );",
];


/// All entities in one embedded database file, with an integer schema version
/// driving ordered migrations on open.
pub struct SqlStorage {
    conn: Connection,
    path: PathBuf,
}

impl SqlStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SqlStorage, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut store = SqlStorage { conn: Connection::open(&path)?, path: path };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<u32, Error> {
        let exists: Option<String> = self.conn
            .query_row("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
                       params![], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Ok(0);
        }
        let version: Option<i64> = self.conn
            .query_row("SELECT version FROM schema_version", params![], |row| row.get(0))
            .optional()?;
        Ok(version.unwrap_or(0) as u32)
    }

    fn migrate(&mut self) -> Result<(), Error> {
        let current = self.schema_version()? as usize;
        if current >= SCHEMA_MIGRATIONS.len() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        if current == 0 {
            tx.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")?;
        }
        for (idx, migration) in SCHEMA_MIGRATIONS.iter().enumerate().skip(current) {
            debug!("applying schema migration to version {}", idx + 1);
            tx.execute_batch(migration)?;
        }
        tx.execute("DELETE FROM schema_version", params![])?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)",
                   params![SCHEMA_MIGRATIONS.len() as i64])?;
        tx.commit()?;
        Ok(())
    }

    fn current_version(&self, repo: RepoName, role: RoleName) -> Result<Option<u64>, Error> {
        let version: Option<i64> = self.conn
            .query_row("SELECT MAX(version) FROM meta WHERE repo = ?1 AND role = ?2",
                       params![format!("{}", repo), format!("{}", role)], |row| row.get(0))
            .optional()?
            .unwrap_or(None);
        Ok(version.map(|v| v as u64))
    }
}

impl Storage for SqlStorage {
    fn store_role(&mut self, repo: RepoName, role: RoleName, version: u64, data: &[u8]) -> Result<(), Error> {
        if let Some(current) = self.current_version(repo, role)? {
            if version < current {
                trace!("not storing {} {} v{}: v{} already stored", repo, role, version, current);
                return Ok(());
            }
        }
        let tx = self.conn.transaction()?;
        if role != RoleName::Root {
            tx.execute("DELETE FROM meta WHERE repo = ?1 AND role = ?2",
                       params![format!("{}", repo), format!("{}", role)])?;
        }
        tx.execute("INSERT OR REPLACE INTO meta (repo, role, version, data) VALUES (?1, ?2, ?3, ?4)",
                   params![format!("{}", repo), format!("{}", role), version as i64, data])?;
        tx.commit()?;
        Ok(())
    }

    fn load_role(&self, repo: RepoName, role: RoleName, version: Option<u64>) -> Result<Option<Vec<u8>>, Error> {
        let data: Option<Vec<u8>> = match version {
            Some(version) => self.conn
                .query_row("SELECT data FROM meta WHERE repo = ?1 AND role = ?2 AND version = ?3",
                           params![format!("{}", repo), format!("{}", role), version as i64],
                           |row| row.get(0))
                .optional()?,
            None => self.conn
                .query_row("SELECT data FROM meta WHERE repo = ?1 AND role = ?2 ORDER BY version DESC LIMIT 1",
                           params![format!("{}", repo), format!("{}", role)], |row| row.get(0))
                .optional()?,
        };
        Ok(data)
    }

    fn clear_non_root_meta(&mut self, repo: RepoName) -> Result<(), Error> {
        self.conn.execute("DELETE FROM meta WHERE repo = ?1 AND role != 'root'",
                          params![format!("{}", repo)])?;
        Ok(())
    }

    fn clear_metadata(&mut self) -> Result<(), Error> {
        self.conn.execute("DELETE FROM meta", params![])?;
        Ok(())
    }

    fn store_tls_creds(&mut self, creds: &TlsCreds) -> Result<(), Error> {
        self.conn.execute("INSERT OR REPLACE INTO tls_creds (unique_mark, ca, cert, pkey) VALUES (0, ?1, ?2, ?3)",
                          params![creds.ca, creds.cert, creds.pkey])?;
        Ok(())
    }

    fn load_tls_creds(&self) -> Result<Option<TlsCreds>, Error> {
        Ok(self.conn
            .query_row("SELECT ca, cert, pkey FROM tls_creds", params![],
                       |row| Ok(TlsCreds { ca: row.get(0)?, cert: row.get(1)?, pkey: row.get(2)? }))
            .optional()?)
    }

    fn clear_tls_creds(&mut self) -> Result<(), Error> {
        self.conn.execute("DELETE FROM tls_creds", params![])?;
        Ok(())
    }

    fn store_primary_keys(&mut self, public: &[u8], private: &[u8]) -> Result<(), Error> {
        self.conn.execute("INSERT OR REPLACE INTO primary_keys (unique_mark, public, private) VALUES (0, ?1, ?2)",
                          params![public, private])?;
        Ok(())
    }

    fn load_primary_keys(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error> {
        Ok(self.conn
            .query_row("SELECT public, private FROM primary_keys", params![],
                       |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?)
    }

    fn store_device_id(&mut self, device_id: &str) -> Result<(), Error> {
        self.conn.execute(
            "INSERT INTO device_info (unique_mark, device_id) VALUES (0, ?1)
             ON CONFLICT (unique_mark) DO UPDATE SET device_id = ?1",
            params![device_id])?;
        Ok(())
    }

    fn load_device_id(&self) -> Result<Option<String>, Error> {
        Ok(self.conn
            .query_row("SELECT device_id FROM device_info", params![], |row| row.get(0))
            .optional()?
            .unwrap_or(None))
    }

    fn store_ecu_registered(&mut self) -> Result<(), Error> {
        self.conn.execute(
            "INSERT INTO device_info (unique_mark, is_registered) VALUES (0, 1)
             ON CONFLICT (unique_mark) DO UPDATE SET is_registered = 1",
            params![])?;
        Ok(())
    }

    fn load_ecu_registered(&self) -> Result<bool, Error> {
        let registered: Option<i64> = self.conn
            .query_row("SELECT is_registered FROM device_info", params![], |row| row.get(0))
            .optional()?;
        Ok(registered.unwrap_or(0) != 0)
    }

    fn store_ecu_serials(&mut self, ecus: &[EcuRecord]) -> Result<(), Error> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM ecu_serials", params![])?;
        for ecu in ecus {
            let public_key = match ecu.public_key {
                Some(ref key) => Some(json::to_string(key)?),
                None => None
            };
            tx.execute(
                "INSERT INTO ecu_serials (serial, hw_id, is_primary, public_key, role, transport)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![ecu.serial.as_str(), ecu.hw_id.as_str(), ecu.is_primary as i64,
                        public_key, json::to_string(&ecu.role)?, ecu.transport])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_ecu_serials(&self) -> Result<Vec<EcuRecord>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT serial, hw_id, is_primary, public_key, role, transport FROM ecu_serials ORDER BY id")?;
        let rows = stmt.query_map(params![], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?, row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?))
        })?;
        let mut ecus = Vec::new();
        for row in rows {
            let (serial, hw_id, is_primary, public_key, role, transport) = row?;
            ecus.push(EcuRecord {
                serial:     serial.parse()?,
                hw_id:      hw_id.parse()?,
                is_primary: is_primary != 0,
                public_key: match public_key {
                    Some(ref text) => Some(json::from_str(text)?),
                    None => None
                },
                role:      json::from_str(&role)?,
                transport: transport,
            });
        }
        Ok(ecus)
    }

    fn store_misconfigured_ecus(&mut self, ecus: &[MisconfiguredEcu]) -> Result<(), Error> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM misconfigured_ecus", params![])?;
        for ecu in ecus {
            tx.execute("INSERT INTO misconfigured_ecus (serial, hw_id, state) VALUES (?1, ?2, ?3)",
                       params![ecu.serial.as_str(), ecu.hw_id.as_str(), json::to_string(&ecu.state)?])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_misconfigured_ecus(&self) -> Result<Vec<MisconfiguredEcu>, Error> {
        let mut stmt = self.conn.prepare("SELECT serial, hw_id, state FROM misconfigured_ecus")?;
        let rows = stmt.query_map(params![], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;
        let mut ecus = Vec::new();
        for row in rows {
            let (serial, hw_id, state) = row?;
            ecus.push(MisconfiguredEcu {
                serial: serial.parse()?,
                hw_id:  hw_id.parse()?,
                state:  json::from_str(&state)?,
            });
        }
        Ok(ecus)
    }

    fn append_installed_version(&mut self, version: &InstalledVersion) -> Result<(), Error> {
        self.conn.execute(
            "INSERT INTO installed_versions (ecu_serial, filename, hashes, length, installed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![version.ecu_serial.as_str(), version.filename,
                    json::to_string(&version.hashes)?, version.length as i64,
                    version.installed_at.to_rfc3339()])?;
        Ok(())
    }

    fn load_installed_versions(&self) -> Result<Vec<InstalledVersion>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT ecu_serial, filename, hashes, length, installed_at FROM installed_versions ORDER BY id")?;
        let rows = stmt.query_map(params![], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?, row.get::<_, String>(4)?))
        })?;
        let mut versions = Vec::new();
        for row in rows {
            let (serial, filename, hashes, length, installed_at) = row?;
            versions.push(InstalledVersion {
                ecu_serial:   serial.parse()?,
                filename:     filename,
                hashes:       json::from_str(&hashes)?,
                length:       length as u64,
                installed_at: DateTime::parse_from_rfc3339(&installed_at)?.with_timezone(&Utc),
            });
        }
        Ok(versions)
    }

    fn allocate_target_file(&mut self, from_director: bool, filename: &str, size: u64) -> Result<Box<TargetWriter>, Error> {
        trace!("allocating {} bytes for {} (director: {})", size, filename, from_director);
        self.conn.execute(
            "INSERT OR REPLACE INTO target_images (filename, from_director, expected, written, committed, data)
             VALUES (?1, ?2, ?3, 0, 0, ZEROBLOB(?3))",
            params![filename, from_director as i64, size as i64])?;
        let rowid = self.conn.last_insert_rowid();
        Ok(Box::new(SqlTargetWriter {
            conn:     Connection::open(&self.path)?,
            rowid:    rowid,
            expected: size,
            written:  0,
        }))
    }

    fn open_target_file(&self, filename: &str) -> Result<Box<Read>, Error> {
        let data: Option<Vec<u8>> = self.conn
            .query_row("SELECT data FROM target_images WHERE filename = ?1 AND committed = 1",
                       params![filename], |row| row.get(0))
            .optional()?;
        match data {
            Some(data) => Ok(Box::new(Cursor::new(data))),
            None => Err(Error::NotFound(format!("no target file {}", filename)))
        }
    }

    fn remove_target_file(&mut self, filename: &str) -> Result<(), Error> {
        self.conn.execute("DELETE FROM target_images WHERE filename = ?1", params![filename])?;
        Ok(())
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Sqlite
    }
}


struct SqlTargetWriter {
    conn:     Connection,
    rowid:    i64,
    expected: u64,
    written:  u64,
}

impl TargetWriter for SqlTargetWriter {
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.written + data.len() as u64 > self.expected {
            return Err(Error::TooLarge(format!("target exceeds declared length of {} bytes", self.expected)));
        }
        let mut blob = self.conn.blob_open(DatabaseName::Main, "target_images", "data", self.rowid, false)?;
        blob.seek(SeekFrom::Start(self.written))?;
        blob.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), Error> {
        if self.written != self.expected {
            let _ = self.conn.execute("DELETE FROM target_images WHERE rowid = ?1", params![self.rowid]);
            return Err(Error::Storage(format!("target is {} bytes, expected {}", self.written, self.expected)));
        }
        self.conn.execute("UPDATE target_images SET written = ?1, committed = 1 WHERE rowid = ?2",
                          params![self.written as i64, self.rowid])?;
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<(), Error> {
        self.conn.execute("DELETE FROM target_images WHERE rowid = ?1", params![self.rowid])?;
        Ok(())
    }
}


/// Ingest a legacy filesystem layout into the database in one transaction,
/// deleting the source files only after a successful commit.
pub fn migrate_fs_to_sql(dir: &Path, sql: &mut SqlStorage) -> Result<(), Error> {
    let legacy = FsStorage::new(dir)?;

    {
        let tx = sql.conn.transaction()?;

        for repo in &[RepoName::Director, RepoName::Images] {
            for role in &[RoleName::Root, RoleName::Targets, RoleName::Timestamp, RoleName::Snapshot] {
                if let Some(data) = legacy.load_role(*repo, *role, None)? {
                    let version = ::datatype::extract_version(&data)?;
                    tx.execute("INSERT OR REPLACE INTO meta (repo, role, version, data) VALUES (?1, ?2, ?3, ?4)",
                               params![format!("{}", repo), format!("{}", role), version as i64, data])?;
                }
            }
            // older root versions are retained individually
            let mut version = 1;
            while let Some(data) = legacy.load_role(*repo, RoleName::Root, Some(version))? {
                tx.execute("INSERT OR REPLACE INTO meta (repo, role, version, data) VALUES (?1, 'root', ?2, ?3)",
                           params![format!("{}", repo), version as i64, data])?;
                version += 1;
            }
        }

        if let Some((public, private)) = legacy.load_primary_keys()? {
            tx.execute("INSERT OR REPLACE INTO primary_keys (unique_mark, public, private) VALUES (0, ?1, ?2)",
                       params![public, private])?;
        }
        if let Some(creds) = legacy.load_tls_creds()? {
            tx.execute("INSERT OR REPLACE INTO tls_creds (unique_mark, ca, cert, pkey) VALUES (0, ?1, ?2, ?3)",
                       params![creds.ca, creds.cert, creds.pkey])?;
        }
        if let Some(device_id) = legacy.load_device_id()? {
            tx.execute("INSERT OR REPLACE INTO device_info (unique_mark, device_id, is_registered) VALUES (0, ?1, ?2)",
                       params![device_id, legacy.load_ecu_registered()? as i64])?;
        }
        for ecu in legacy.load_ecu_serials()? {
            let public_key = match ecu.public_key {
                Some(ref key) => Some(json::to_string(key)?),
                None => None
            };
            tx.execute(
                "INSERT OR REPLACE INTO ecu_serials (serial, hw_id, is_primary, public_key, role, transport)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![ecu.serial.as_str(), ecu.hw_id.as_str(), ecu.is_primary as i64,
                        public_key, json::to_string(&ecu.role)?, ecu.transport])?;
        }
        for ecu in legacy.load_misconfigured_ecus()? {
            tx.execute("INSERT INTO misconfigured_ecus (serial, hw_id, state) VALUES (?1, ?2, ?3)",
                       params![ecu.serial.as_str(), ecu.hw_id.as_str(), json::to_string(&ecu.state)?])?;
        }
        for version in legacy.load_installed_versions()? {
            tx.execute(
                "INSERT INTO installed_versions (ecu_serial, filename, hashes, length, installed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![version.ecu_serial.as_str(), version.filename,
                        json::to_string(&version.hashes)?, version.length as i64,
                        version.installed_at.to_rfc3339()])?;
        }

        let targets_dir = dir.join("targets");
        if targets_dir.is_dir() {
            for entry in fs::read_dir(&targets_dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if ! entry.path().is_file() || name.starts_with('.') {
                    continue;
                }
                let mut data = Vec::new();
                fs::File::open(entry.path())?.read_to_end(&mut data)?;
                tx.execute(
                    "INSERT OR REPLACE INTO target_images (filename, from_director, expected, written, committed, data)
                     VALUES (?1, 0, ?2, ?2, 1, ?3)",
                    params![name, data.len() as i64, data])?;
            }
        }

        tx.commit()?;
    }

    for subdir in &["metadata", "targets"] {
        let path = dir.join(subdir);
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        }
    }
    for name in &["ca.pem", "client.pem", "pkey.pem", "uptane_private_key", "uptane_public_key",
                  "device_id", "is_registered", "primary_ecu_serial", "primary_ecu_hardware_id",
                  "secondaries_list", "misconfigured_ecus", "installed_versions"] {
        let path = dir.join(name);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
