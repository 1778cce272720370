extern crate chan;
extern crate serde_json as json;
extern crate tempfile;
extern crate uptane;

use std::collections::HashMap;
use std::path::Path;
use std::thread;
use tempfile::tempdir;

use uptane::datatype::{Command, Config, EcuManifests, Event, SecondaryPolicy, Target,
                       TufCustom, TufSigned};
use uptane::http::TestClient;
use uptane::orchestrator::Orchestrator;
use uptane::pacman::PacMan;
use uptane::secondary::{SecondaryBus, VirtualSecondary};
use uptane::storage::FsStorage;
use uptane::uptane::ManifestSigner;
use uptane::uptane::test_meta::{RootKeys, meta_entry, role_body, sha256_hex, signed_root,
                                targets_entry, with_field};
use uptane::bootloader::Bootloader;
use uptane::datatype::SignatureType;


const PRIMARY_SERIAL: &'static str = "testecuserial";
const PRIMARY_HW_ID:  &'static str = "testecuhwid";


fn test_config() -> Config {
    Config::parse(&format!(r#"
        [core]
        server = "http://localhost/core"
        polling = false

        [uptane]
        director_server = "http://localhost/director"
        repo_server = "http://localhost/repo"
        primary_ecu_serial = "{}"
        primary_ecu_hardware_id = "{}"
    "#, PRIMARY_SERIAL, PRIMARY_HW_ID)).expect("test config")
}

fn test_signer() -> ManifestSigner {
    let keys = RootKeys::generate(1);
    let (priv_key, _) = keys.pairs[0].clone();
    ManifestSigner {
        primary_ecu: PRIMARY_SERIAL.parse().unwrap(),
        private_key: priv_key,
        sig_type:    SignatureType::Ed25519,
    }
}

fn new_orchestrator(dir: &Path, client: &TestClient, bus: SecondaryBus, pacman: PacMan)
                    -> Orchestrator {
    let storage = Box::new(FsStorage::new(dir.join("storage")).unwrap());
    let mut orchestrator = Orchestrator::from_parts(
        test_config(), storage, Box::new(client.clone()), Some(test_signer()), bus, pacman
    ).expect("orchestrator");
    orchestrator.bootloader = Bootloader::new(dir.join("reboot_flag"));
    orchestrator
}

/// Serve a complete two-repository metadata chain with one target for the
/// primary ECU.
fn serve_repo_chain(client: &TestClient, image: &[u8]) -> Target {
    let director_keys = RootKeys::generate(1);
    let image_keys = RootKeys::generate(1);

    let director_root = signed_root(&director_keys, &director_keys, 1, false);
    client.set_route("/director/1.root.json", director_root.clone());
    client.set_route("/director/root.json", director_root);

    let mut entries = json::Map::new();
    entries.insert("primary.img".into(),
                   targets_entry(image.len() as u64, &sha256_hex(image),
                                 &[(PRIMARY_SERIAL, PRIMARY_HW_ID)]));
    let director_targets = json::to_vec(&director_keys.sign(
        with_field(role_body("Targets".parse().unwrap(), 2, false), "targets",
                   json::Value::Object(entries.clone()))
    )).unwrap();
    client.set_route("/director/targets.json", director_targets);

    let image_root = signed_root(&image_keys, &image_keys, 1, false);
    client.set_route("/repo/1.root.json", image_root.clone());
    client.set_route("/repo/root.json", image_root);

    let mut image_entries = json::Map::new();
    image_entries.insert("primary.img".into(),
                         targets_entry(image.len() as u64, &sha256_hex(image), &[]));
    let image_targets = json::to_vec(&image_keys.sign(
        with_field(role_body("Targets".parse().unwrap(), 4, false), "targets",
                   json::Value::Object(image_entries))
    )).unwrap();

    let mut snapshot_meta = json::Map::new();
    snapshot_meta.insert("targets.json".into(), meta_entry(image_targets.len() as u64, None, 4));
    let snapshot = json::to_vec(&image_keys.sign(
        with_field(role_body("Snapshot".parse().unwrap(), 3, false), "meta",
                   json::Value::Object(snapshot_meta))
    )).unwrap();

    let mut timestamp_meta = json::Map::new();
    timestamp_meta.insert("snapshot.json".into(),
                          meta_entry(snapshot.len() as u64, Some(&sha256_hex(&snapshot)), 3));
    let timestamp = json::to_vec(&image_keys.sign(
        with_field(role_body("Timestamp".parse().unwrap(), 2, false), "meta",
                   json::Value::Object(timestamp_meta))
    )).unwrap();

    client.set_route("/repo/targets.json", image_targets);
    client.set_route("/repo/snapshot.json", snapshot);
    client.set_route("/repo/timestamp.json", timestamp);
    client.set_route("/repo/targets/primary.img", image.to_vec());

    let mut custom = TufCustom::default();
    let mut ecus = HashMap::new();
    ecus.insert(PRIMARY_SERIAL.parse().unwrap(), PRIMARY_HW_ID.parse().unwrap());
    custom.ecuIdentifiers = Some(ecus);
    Target {
        filename: "primary.img".into(),
        length:   image.len() as u64,
        hashes:   {
            let mut hashes = HashMap::new();
            hashes.insert("sha256".to_string(), sha256_hex(image));
            hashes
        },
        custom:   Some(custom),
    }
}

fn manifest_puts(client: &TestClient) -> Vec<TufSigned> {
    client.requests_for("PUT").into_iter()
        .filter(|req| req.path == "/director/manifest")
        .map(|req| json::from_slice(&req.body.expect("manifest body")).expect("manifest envelope"))
        .collect()
}


#[test]
fn no_updates_loop_is_idempotent() {
    let dir = tempdir().unwrap();
    let client = TestClient::routed(HashMap::new());
    serve_repo_chain(&client, b"primary-firmware");

    let mut orchestrator = new_orchestrator(dir.path(), &client,
                                            SecondaryBus::new(SecondaryPolicy::Continue),
                                            PacMan::Off);
    let (ctx, crx) = chan::async::<Command>();
    let (etx, erx) = chan::async::<Event>();
    let handle = thread::spawn(move || orchestrator.run(crx, etx));

    use uptane::storage::Storage;
    use uptane::datatype::{RepoName, RoleName};
    let storage = FsStorage::new(dir.path().join("storage")).unwrap();

    // first tick initialises, subsequent ticks see no change
    ctx.send(Command::CheckForUpdates);
    match erx.recv().expect("first event") {
        Event::TargetsUpdated(targets) => {
            assert_eq!(targets.len(), 1);
            assert_eq!(targets[0].filename, "primary.img");
        }
        other => panic!("expected TargetsUpdated, got {}", other)
    }
    let bytes_after_first = storage.load_role(RepoName::Director, RoleName::Targets, None).unwrap().unwrap();

    ctx.send(Command::CheckForUpdates);
    assert_eq!(erx.recv().expect("second event"), Event::TimestampUpdated);
    ctx.send(Command::CheckForUpdates);
    assert_eq!(erx.recv().expect("third event"), Event::TimestampUpdated);
    ctx.send(Command::Shutdown);
    handle.join().expect("orchestrator loop");

    // idempotence: unchanged remote state leaves identical on-disk bytes
    let bytes_after_third = storage.load_role(RepoName::Director, RoleName::Targets, None).unwrap().unwrap();
    assert_eq!(bytes_after_first, bytes_after_third);
}

#[test]
fn install_flow_reports_to_director() {
    let dir = tempdir().unwrap();
    let client = TestClient::routed(HashMap::new());

    let mut orchestrator = new_orchestrator(dir.path(), &client,
                                            SecondaryBus::new(SecondaryPolicy::Continue),
                                            PacMan::new_test(&dir.path().join("tpm"), true));
    let (ctx, crx) = chan::async::<Command>();
    let (etx, erx) = chan::async::<Event>();
    let handle = thread::spawn(move || orchestrator.run(crx, etx));

    let mut ecus = HashMap::new();
    ecus.insert(PRIMARY_SERIAL.parse().unwrap(), PRIMARY_HW_ID.parse().unwrap());
    let mut custom = TufCustom::default();
    custom.ecuIdentifiers = Some(ecus);
    let target = Target {
        filename: PRIMARY_SERIAL.into(),
        length:   0,
        hashes:   {
            let mut hashes = HashMap::new();
            hashes.insert("sha256".to_string(), sha256_hex(PRIMARY_SERIAL.as_bytes()));
            hashes
        },
        custom:   Some(custom),
    };
    ctx.send(Command::Install(vec![target]));
    ctx.send(Command::Shutdown);

    match erx.recv().expect("install event") {
        Event::InstallComplete(result) => assert_eq!(result.id, PRIMARY_SERIAL),
        other => panic!("expected InstallComplete, got {}", other)
    }
    assert_eq!(erx.recv().expect("manifest event"), Event::ManifestSent);
    handle.join().expect("orchestrator loop");

    let manifests = manifest_puts(&client);
    let envelope = manifests.last().expect("a manifest was sent");
    assert_eq!(envelope.signatures.len(), 1);
    let body: EcuManifests = json::from_value(envelope.signed.clone()).expect("manifest body");
    assert_eq!(body.primary_ecu_serial, PRIMARY_SERIAL.parse().unwrap());
    assert_eq!(body.ecu_version_manifests.len(), 1);
}

#[test]
fn hardware_mismatch_aborts_iteration() {
    let dir = tempdir().unwrap();
    let client = TestClient::routed(HashMap::new());

    // the chain addresses the primary under the wrong hardware identifier
    let keys = RootKeys::generate(1);
    let root = signed_root(&keys, &keys, 1, false);
    client.set_route("/director/1.root.json", root.clone());
    client.set_route("/director/root.json", root);
    let mut entries = json::Map::new();
    entries.insert("primary.img".into(), targets_entry(8, "aabb", &[(PRIMARY_SERIAL, "wrong-hw")]));
    let targets = json::to_vec(&keys.sign(
        with_field(role_body("Targets".parse().unwrap(), 2, false), "targets",
                   json::Value::Object(entries))
    )).unwrap();
    client.set_route("/director/targets.json", targets);

    let mut orchestrator = new_orchestrator(dir.path(), &client,
                                            SecondaryBus::new(SecondaryPolicy::Continue),
                                            PacMan::Off);
    let (ctx, crx) = chan::async::<Command>();
    let (etx, erx) = chan::async::<Event>();
    let handle = thread::spawn(move || orchestrator.run(crx, etx));

    ctx.send(Command::CheckForUpdates);
    ctx.send(Command::Shutdown);
    assert_eq!(erx.recv().expect("fallback event"), Event::TimestampUpdated);
    handle.join().expect("orchestrator loop");

    // the images chain was never consulted
    assert!(client.requests().iter().all(|req| !req.path.starts_with("/repo/")));
}

#[test]
fn manifest_includes_good_secondary() {
    let dir = tempdir().unwrap();
    let client = TestClient::routed(HashMap::new());

    let mut bus = SecondaryBus::new(SecondaryPolicy::Continue);
    bus.register(Box::new(virtual_secondary(&dir.path().join("sec"), "secondary_ecu_serial", None)));

    let mut orchestrator = new_orchestrator(dir.path(), &client, bus, PacMan::Off);
    assert!(orchestrator.put_manifest().expect("put manifest"));

    let manifests = manifest_puts(&client);
    let body: EcuManifests = json::from_value(manifests[0].signed.clone()).expect("manifest body");
    assert_eq!(body.ecu_version_manifests.len(), 2);
    assert!(body.ecu_version_manifests.contains_key(&"secondary_ecu_serial".parse().unwrap()));
}

#[test]
fn manifest_omits_secondary_with_bad_key() {
    let dir = tempdir().unwrap();
    let client = TestClient::routed(HashMap::new());

    let wrong_key = RootKeys::generate(1).pairs[0].1.clone();
    let mut bus = SecondaryBus::new(SecondaryPolicy::Continue);
    bus.register(Box::new(virtual_secondary(&dir.path().join("sec"), "secondary_ecu_serial",
                                            Some(wrong_key))));

    let mut orchestrator = new_orchestrator(dir.path(), &client, bus, PacMan::Off);
    assert!(orchestrator.put_manifest().expect("put manifest"));

    let manifests = manifest_puts(&client);
    let body: EcuManifests = json::from_value(manifests[0].signed.clone()).expect("manifest body");
    assert_eq!(body.ecu_version_manifests.len(), 1);
    assert!(body.ecu_version_manifests.contains_key(&PRIMARY_SERIAL.parse().unwrap()));
}

fn virtual_secondary(dir: &Path, serial: &str, wrong_key: Option<uptane::datatype::Key>)
                     -> VirtualSecondary {
    use uptane::datatype::{SecondaryConfig, SecondaryKind};
    let mut secondary = VirtualSecondary::new(&SecondaryConfig {
        kind:              SecondaryKind::Virtual,
        ecu_serial:        serial.parse().unwrap(),
        ecu_hardware_id:   "secondary-hw".parse().unwrap(),
        partial_verifying: false,
        full_client_dir:   dir.to_string_lossy().into_owned(),
        metadata_path:     "".into(),
        firmware_path:     "".into(),
        target_name_path:  "".into(),
    }).expect("virtual secondary");
    if let Some(key) = wrong_key {
        secondary.set_public_key(key);
    }
    secondary
}
