extern crate chrono;
extern crate tempfile;
extern crate uptane;

#[macro_use]
extern crate maplit;

use chrono::Utc;
use tempfile::tempdir;

use uptane::datatype::{EcuRecord, EcuRole, InstalledVersion, RepoName, RoleName, StorageConfig,
                       StorageKind};
use uptane::storage::{FsStorage, Storage, TlsCreds, open_storage};
use uptane::uptane::test_meta::{RootKeys, signed_root};


/// Seed a legacy filesystem layout, open a SQL-typed store over the same
/// directory, and check every entity survived byte-for-byte with the source
/// files removed after the commit.
#[test]
fn filesystem_layout_migrates_into_database() {
    let dir = tempdir().unwrap();
    let keys = RootKeys::generate(1);

    let roots = (1..4).map(|version| signed_root(&keys, &keys, version, false)).collect::<Vec<_>>();
    let targets = br#"{"signatures":[],"signed":{"_type":"Targets","expires":"2038-01-19T03:14:06Z","version":2}}"#.to_vec();
    let creds = TlsCreds {
        ca:   b"ca-bytes".to_vec(),
        cert: b"cert-bytes".to_vec(),
        pkey: b"pkey-bytes".to_vec(),
    };
    let installed = InstalledVersion {
        ecu_serial:   "migrating-primary".parse().unwrap(),
        filename:     "old.img".into(),
        hashes:       hashmap!{"sha256".to_string() => "aa".to_string()},
        length:       9,
        installed_at: Utc::now(),
    };
    let roster = vec![
        EcuRecord {
            serial: "migrating-primary".parse().unwrap(), hw_id: "hw-p".parse().unwrap(),
            is_primary: true, public_key: None, role: EcuRole::UptaneFull, transport: None,
        },
        EcuRecord {
            serial: "migrating-secondary".parse().unwrap(), hw_id: "hw-s".parse().unwrap(),
            is_primary: false, public_key: None, role: EcuRole::UptanePartial, transport: None,
        },
    ];

    {
        let mut legacy = FsStorage::new(dir.path()).unwrap();
        for (idx, root) in roots.iter().enumerate() {
            legacy.store_role(RepoName::Director, RoleName::Root, idx as u64 + 1, root).unwrap();
        }
        legacy.store_role(RepoName::Director, RoleName::Targets, 2, &targets).unwrap();
        legacy.store_tls_creds(&creds).unwrap();
        legacy.store_primary_keys(b"public-key", b"private-key").unwrap();
        legacy.store_device_id("device-123").unwrap();
        legacy.store_ecu_registered().unwrap();
        legacy.store_ecu_serials(&roster).unwrap();
        legacy.append_installed_version(&installed).unwrap();

        let mut writer = legacy.allocate_target_file(false, "image.bin", 5).unwrap();
        writer.write_chunk(b"bytes").unwrap();
        writer.commit().unwrap();
    }

    let migrated = open_storage(&StorageConfig {
        kind: StorageKind::Sqlite,
        path: dir.path().to_string_lossy().into_owned(),
    }).unwrap();

    for (idx, root) in roots.iter().enumerate() {
        let loaded = migrated.load_role(RepoName::Director, RoleName::Root, Some(idx as u64 + 1))
            .unwrap().unwrap();
        assert_eq!(&loaded, root);
    }
    assert_eq!(migrated.load_role(RepoName::Director, RoleName::Root, None).unwrap().unwrap(),
               roots[2]);
    assert_eq!(migrated.load_role(RepoName::Director, RoleName::Targets, None).unwrap().unwrap(),
               targets);
    assert_eq!(migrated.load_tls_creds().unwrap().unwrap(), creds);
    assert_eq!(migrated.load_primary_keys().unwrap().unwrap(),
               (b"public-key".to_vec(), b"private-key".to_vec()));
    assert_eq!(migrated.load_device_id().unwrap().unwrap(), "device-123");
    assert!(migrated.load_ecu_registered().unwrap());
    let loaded_roster = migrated.load_ecu_serials().unwrap();
    assert_eq!(loaded_roster.len(), 2);
    assert_eq!(loaded_roster[0].serial, roster[0].serial);
    assert_eq!(loaded_roster[1].serial, roster[1].serial);
    let versions = migrated.load_installed_versions().unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].filename, installed.filename);
    assert_eq!(versions[0].hashes, installed.hashes);

    let mut image = Vec::new();
    use std::io::Read;
    migrated.open_target_file("image.bin").unwrap().read_to_end(&mut image).unwrap();
    assert_eq!(&image, b"bytes");

    // source files are removed only after the commit
    assert!(!dir.path().join("metadata").exists());
    assert!(!dir.path().join("targets").exists());
    assert!(!dir.path().join("device_id").exists());
    assert!(!dir.path().join("installed_versions").exists());
    assert!(dir.path().join("sql.db").is_file());
}

/// Opening the SQL store again must not re-run the migration.
#[test]
fn reopening_migrated_store_is_stable() {
    let dir = tempdir().unwrap();
    {
        let mut legacy = FsStorage::new(dir.path()).unwrap();
        legacy.store_device_id("device-456").unwrap();
    }
    let config = StorageConfig {
        kind: StorageKind::Sqlite,
        path: dir.path().to_string_lossy().into_owned(),
    };
    {
        let store = open_storage(&config).unwrap();
        assert_eq!(store.load_device_id().unwrap().unwrap(), "device-456");
    }
    let store = open_storage(&config).unwrap();
    assert_eq!(store.load_device_id().unwrap().unwrap(), "device-456");
}
