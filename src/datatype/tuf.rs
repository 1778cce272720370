use chrono::{DateTime, Utc};
use crypto::digest::Digest;
use crypto::sha2::Sha256;
use serde::de::{Deserialize, Deserializer, Error as SerdeError};
use serde_json as json;
use std::fmt::{self, Display, Formatter};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use datatype::{EcuSerial, Error, HardwareId, InstallResult, Signature, SignatureType,
               canonicalize_json};


/// The role of a metadata document in the trust hierarchy.
#[derive(Serialize, Hash, Eq, PartialEq, Debug, Clone, Copy)]
pub enum RoleName {
    Root,
    Targets,
    Snapshot,
    Timestamp,
}

impl RoleName {
    /// The file name under which this role is stored and fetched.
    pub fn filename(&self) -> String {
        format!("{}.json", self)
    }
}

impl FromStr for RoleName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root"      | "Root"      => Ok(RoleName::Root),
            "snapshot"  | "Snapshot"  => Ok(RoleName::Snapshot),
            "targets"   | "Targets"   => Ok(RoleName::Targets),
            "timestamp" | "Timestamp" => Ok(RoleName::Timestamp),
            _ => Err(Error::TufRole(s.into()))
        }
    }
}

impl Display for RoleName {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            RoleName::Root      => write!(f, "root"),
            RoleName::Targets   => write!(f, "targets"),
            RoleName::Snapshot  => write!(f, "snapshot"),
            RoleName::Timestamp => write!(f, "timestamp"),
        }
    }
}

impl<'de> Deserialize<'de> for RoleName {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<RoleName, D::Error> {
        if let json::Value::String(ref s) = Deserialize::deserialize(de)? {
            s.parse().map_err(|err| SerdeError::custom(format!("unknown RoleName: {}", err)))
        } else {
            Err(SerdeError::custom("unknown RoleName"))
        }
    }
}


/// One of the two metadata repositories a vehicle talks to.
#[derive(Serialize, Hash, Eq, PartialEq, Debug, Clone, Copy)]
pub enum RepoName {
    Director,
    Images,
}

impl Display for RepoName {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            RepoName::Director => write!(f, "director"),
            RepoName::Images   => write!(f, "repo"),
        }
    }
}

impl FromStr for RepoName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "director"       => Ok(RepoName::Director),
            "repo" | "image" => Ok(RepoName::Images),
            _ => Err(Error::Parse(format!("unknown RepoName: {}", s)))
        }
    }
}

impl<'de> Deserialize<'de> for RepoName {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<RepoName, D::Error> {
        if let json::Value::String(ref s) = Deserialize::deserialize(de)? {
            s.parse().map_err(|err| SerdeError::custom(format!("unknown RepoName: {}", err)))
        } else {
            Err(SerdeError::custom("unknown RepoName"))
        }
    }
}


/// The signed payload of any role document.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct RoleData {
    pub _type:   RoleName,
    pub version: u64,
    pub expires: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys:    Option<HashMap<String, Key>>,        // root only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles:   Option<HashMap<RoleName, RoleMeta>>, // root only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<HashMap<String, TufMeta>>,    // targets only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta:    Option<HashMap<String, TufMeta>>,    // timestamp/snapshot only
}

impl RoleData {
    pub fn expired(&self) -> bool {
        self.expires < Utc::now()
    }
}

/// The keys authorised to sign for a role, with the minimum count of distinct
/// valid signatures required.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct RoleMeta {
    pub keyids:    HashSet<String>,
    pub threshold: i64,
}


#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Key {
    pub keytype: KeyType,
    pub keyval:  KeyValue,
}

impl Key {
    /// A key is identified by the hash of its canonical form.
    pub fn key_id(&self) -> Result<String, Error> {
        let canonical = canonicalize_json(&json::to_vec(self)?)?;
        let mut hasher = Sha256::new();
        hasher.input(&canonical);
        Ok(hasher.result_str())
    }

    /// The raw key material in the form `SignatureType::verify_msg` expects.
    pub fn raw_material(&self) -> Result<Vec<u8>, Error> {
        match self.keytype.sig_type() {
            SignatureType::Ed25519   => Ok(::hex::decode(&self.keyval.public)?),
            SignatureType::RsaSsaPss => Ok(::pem::parse(&self.keyval.public)?.contents),
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct KeyValue {
    pub public: String,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum KeyType {
    Ed25519,
    Rsa2048,
    Rsa3072,
    Rsa4096,
}

impl KeyType {
    pub fn sig_type(&self) -> SignatureType {
        match *self {
            KeyType::Ed25519 => SignatureType::Ed25519,
            KeyType::Rsa2048 | KeyType::Rsa3072 | KeyType::Rsa4096 => SignatureType::RsaSsaPss,
        }
    }
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ED25519" | "ed25519" => Ok(KeyType::Ed25519),
            "RSA2048" => Ok(KeyType::Rsa2048),
            "RSA3072" => Ok(KeyType::Rsa3072),
            "RSA4096" => Ok(KeyType::Rsa4096),
            _ => Err(Error::TufKeyType(s.into()))
        }
    }
}

impl Display for KeyType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            KeyType::Ed25519 => write!(f, "ED25519"),
            KeyType::Rsa2048 => write!(f, "RSA2048"),
            KeyType::Rsa3072 => write!(f, "RSA3072"),
            KeyType::Rsa4096 => write!(f, "RSA4096"),
        }
    }
}

impl ::serde::Serialize for KeyType {
    fn serialize<S: ::serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format!("{}", self))
    }
}

impl<'de> Deserialize<'de> for KeyType {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<KeyType, D::Error> {
        if let json::Value::String(ref s) = Deserialize::deserialize(de)? {
            s.parse().map_err(|err| SerdeError::custom(format!("unknown KeyType: {}", err)))
        } else {
            Err(SerdeError::custom("unknown KeyType"))
        }
    }
}


/// The private half of the primary's keypair, used to sign manifests.
#[derive(Clone)]
pub struct PrivateKey {
    pub keyid:   String,
    pub der_key: Vec<u8>,
}

impl PrivateKey {
    /// Wrap a payload in a signed envelope.
    pub fn sign_data(&self, data: json::Value, sig_type: SignatureType) -> Result<TufSigned, Error> {
        let cjson = canonicalize_json(&json::to_vec(&data)?)?;
        let sig = sig_type.sign_msg(&cjson, &self.der_key)?;
        Ok(TufSigned {
            signatures: vec![Signature {
                keyid:  self.keyid.clone(),
                method: format!("{}", sig_type),
                sig:    sig_type.encode_sig(&sig),
            }],
            signed: data,
        })
    }
}


/// The outer envelope of any signed document.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct TufSigned {
    #[serde(default)]
    pub signatures: Vec<Signature>,
    pub signed:     json::Value,
}

/// Read the version of a signed document before any verification. Only ever
/// used to decide which versions to fetch; trust comes from `verify_root`.
pub fn extract_version(bytes: &[u8]) -> Result<u64, Error> {
    let signed = json::from_slice::<TufSigned>(bytes)?;
    signed.signed.get("version").and_then(|v| v.as_u64())
        .ok_or_else(|| Error::Parse("no version field in signed metadata".into()))
}


/// Length, hashes and custom data for a target or a pinned role document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TufMeta {
    pub length: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub hashes: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<TufCustom>,
}

#[allow(non_snake_case)]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TufCustom {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecuIdentifiers: Option<HashMap<EcuSerial, HardwareId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targetFormat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// A named, sized, hashed software artefact from a targets document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub filename: String,
    pub length:   u64,
    pub hashes:   HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom:   Option<TufCustom>,
}

impl Target {
    pub fn from_meta(filename: String, meta: TufMeta) -> Target {
        Target { filename: filename, length: meta.length, hashes: meta.hashes, custom: meta.custom }
    }

    /// The ECUs this target is destined for, according to the Director.
    pub fn ecus(&self) -> HashMap<EcuSerial, HardwareId> {
        self.custom.as_ref()
            .and_then(|c| c.ecuIdentifiers.clone())
            .unwrap_or_else(HashMap::new)
    }

    pub fn sha256(&self) -> Option<&String> {
        self.hashes.get("sha256")
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.filename, self.length)
    }
}


/// The installed image an ECU reports in its version manifest.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct TufImage {
    pub filepath: String,
    pub fileinfo: TufMeta,
}

/// One ECU's signed version report body.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct EcuVersion {
    pub attacks_detected:         String,
    pub ecu_serial:               EcuSerial,
    pub installed_image:          TufImage,
    pub previous_timeserver_time: String,
    pub timeserver_time:          String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<EcuCustom>,
}

impl EcuVersion {
    pub fn from_target(serial: EcuSerial, filepath: String, length: u64,
                       hashes: HashMap<String, String>, custom: Option<EcuCustom>) -> EcuVersion {
        EcuVersion {
            attacks_detected: "".into(),
            ecu_serial: serial,
            installed_image: TufImage {
                filepath: filepath,
                fileinfo: TufMeta { length: length, hashes: hashes, version: None, custom: None },
            },
            previous_timeserver_time: "1970-01-01T00:00:00Z".into(),
            timeserver_time: "1970-01-01T00:00:00Z".into(),
            custom: custom,
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct EcuCustom {
    pub operation_result: InstallResult,
}

/// The body of the vehicle version manifest sent to the Director.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct EcuManifests {
    pub primary_ecu_serial:    EcuSerial,
    pub ecu_version_manifests: HashMap<EcuSerial, TufSigned>,
}
