//! Builders for signed metadata used by the verification tests. Fixtures are
//! signed at run time with freshly generated keys so that every signature
//! check in a test is a real one.

use crypto::ed25519;
use ring::rand::{SecureRandom, SystemRandom};
use serde_json as json;
use std::collections::HashMap;

use datatype::{Key, KeyType, KeyValue, PrivateKey, RoleName, SignatureType, TufSigned, Util};


pub const VALID_UNTIL:   &'static str = "2038-01-19T03:14:06Z";
pub const EXPIRED_AT:    &'static str = "2017-01-01T00:00:00Z";


pub fn sha256_hex(data: &[u8]) -> String {
    Util::sha256_hex(data)
}

/// A set of Ed25519 signing keys standing in for one Root generation. The
/// same key set is listed for every role with a threshold equal to the
/// number of keys.
#[derive(Clone)]
pub struct RootKeys {
    pub pairs: Vec<(PrivateKey, Key)>,
}

impl RootKeys {
    pub fn generate(count: usize) -> RootKeys {
        let pairs = (0..count).map(|_| {
            let mut seed = [0u8; 32];
            SystemRandom::new().fill(&mut seed).expect("seed");
            let (priv_key, pub_key) = ed25519::keypair(&seed);
            let key = Key {
                keytype: KeyType::Ed25519,
                keyval:  KeyValue { public: ::hex::encode(&pub_key[..]) },
            };
            let keyid = key.key_id().expect("key id");
            (PrivateKey { keyid: keyid, der_key: priv_key.to_vec() }, key)
        }).collect();
        RootKeys { pairs: pairs }
    }

    pub fn threshold(&self) -> usize {
        self.pairs.len()
    }

    pub fn key_ids(&self) -> Vec<String> {
        self.pairs.iter().map(|&(ref priv_key, _)| priv_key.keyid.clone()).collect()
    }

    /// A Root body listing these keys for all four roles.
    pub fn root_body(&self, version: u64, expired: bool) -> json::Value {
        let mut keys = HashMap::new();
        for &(ref priv_key, ref key) in &self.pairs {
            keys.insert(priv_key.keyid.clone(), json::to_value(key).expect("key"));
        }
        let mut role = json::Map::new();
        role.insert("keyids".into(), json::to_value(self.key_ids()).expect("keyids"));
        role.insert("threshold".into(), (self.threshold() as u64).into());
        let role = json::Value::Object(role);

        let mut body = json::Map::new();
        body.insert("_type".into(), "Root".into());
        body.insert("version".into(), version.into());
        body.insert("expires".into(), expiry(expired).into());
        body.insert("keys".into(), json::to_value(keys).expect("keys"));
        let mut roles = json::Map::new();
        for name in &["Root", "Targets", "Snapshot", "Timestamp"] {
            roles.insert((*name).into(), role.clone());
        }
        body.insert("roles".into(), json::Value::Object(roles));
        json::Value::Object(body)
    }

    /// Sign a body with every key in this set, merging into one envelope.
    pub fn sign(&self, body: json::Value) -> TufSigned {
        let mut out: Option<TufSigned> = None;
        for &(ref priv_key, _) in &self.pairs {
            let signed = priv_key.sign_data(body.clone(), SignatureType::Ed25519).expect("sign");
            out = Some(match out {
                None => signed,
                Some(mut acc) => { acc.signatures.extend(signed.signatures); acc }
            });
        }
        out.expect("at least one key")
    }

    /// A Root listing these keys, signed by the previous generation as well
    /// as by itself, as a rotation requires.
    pub fn cross_signed(&self, previous: &RootKeys, version: u64, expired: bool) -> Vec<u8> {
        let body = self.root_body(version, expired);
        let mut signed = previous.sign(body.clone());
        signed.signatures.extend(self.sign(body).signatures);
        json::to_vec(&signed).expect("serialize root")
    }
}

pub fn expiry(expired: bool) -> &'static str {
    if expired { EXPIRED_AT } else { VALID_UNTIL }
}

/// A serialized Root whose body lists `listed` and is signed by `signing`.
pub fn signed_root(signing: &RootKeys, listed: &RootKeys, version: u64, expired: bool) -> Vec<u8> {
    let body = listed.root_body(version, expired);
    json::to_vec(&signing.sign(body)).expect("serialize root")
}

/// A bare role body with no targets or meta listings yet.
pub fn role_body(role: RoleName, version: u64, expired: bool) -> json::Value {
    let mut body = json::Map::new();
    body.insert("_type".into(), format!("{:?}", role).into());
    body.insert("version".into(), version.into());
    body.insert("expires".into(), expiry(expired).into());
    json::Value::Object(body)
}

/// One targets-listing entry: `(filename, length, sha256, ecu serial, hardware id)`.
pub fn targets_entry(length: u64, sha256: &str, ecus: &[(&str, &str)]) -> json::Value {
    let mut entry = json::Map::new();
    entry.insert("length".into(), length.into());
    let mut hashes = json::Map::new();
    hashes.insert("sha256".into(), sha256.into());
    entry.insert("hashes".into(), json::Value::Object(hashes));
    if !ecus.is_empty() {
        let mut ids = json::Map::new();
        for &(serial, hw_id) in ecus {
            ids.insert(serial.into(), hw_id.into());
        }
        let mut custom = json::Map::new();
        custom.insert("ecuIdentifiers".into(), json::Value::Object(ids));
        entry.insert("custom".into(), json::Value::Object(custom));
    }
    json::Value::Object(entry)
}

/// A meta-listing entry as written by Timestamp and Snapshot bodies.
pub fn meta_entry(length: u64, sha256: Option<&str>, version: u64) -> json::Value {
    let mut entry = json::Map::new();
    entry.insert("length".into(), length.into());
    if let Some(hash) = sha256 {
        let mut hashes = json::Map::new();
        hashes.insert("sha256".into(), hash.into());
        entry.insert("hashes".into(), json::Value::Object(hashes));
    }
    entry.insert("version".into(), version.into());
    json::Value::Object(entry)
}

/// Insert a field into a JSON object body.
pub fn with_field(mut body: json::Value, field: &str, value: json::Value) -> json::Value {
    body.as_object_mut().expect("object body").insert(field.into(), value);
    body
}
