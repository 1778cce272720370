use std::fs::File;
use std::io::prelude::*;
use std::str::FromStr;
use uuid::Uuid;

use datatype::{EcuSerial, Error, HardwareId, KeyType, Url};


/// A container for all parsed config sections.
#[derive(Deserialize, Default, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub core:      CoreConfig,
    pub device:    DeviceConfig,
    pub discovery: DiscoveryConfig,
    pub pacman:    PacManConfig,
    pub storage:   StorageConfig,
    pub telemetry: TelemetryConfig,
    pub tls:       Option<TlsConfig>,
    pub uptane:    UptaneConfig,
    #[serde(rename = "secondary")]
    pub secondaries: Vec<SecondaryConfig>,
}

impl Config {
    /// Read a toml config file using default values for missing sections or fields.
    pub fn load(path: &str) -> Result<Config, Error> {
        info!("Loading config file: {}", path);
        let mut file = File::open(path)
            .map_err(|err| Error::Config(format!("couldn't open config: {}", err)))?;
        let mut text = String::new();
        file.read_to_string(&mut text)
            .map_err(|err| Error::Config(format!("couldn't read config: {}", err)))?;
        Config::parse(&text)
    }

    /// Parse a toml config using default values for missing sections or fields.
    pub fn parse(text: &str) -> Result<Config, Error> {
        let config: Config = ::toml::from_str(text)?;
        if config.uptane.primary_ecu_serial.is_unknown() {
            return Err(Error::Config("uptane.primary_ecu_serial is required".into()));
        }
        Ok(config)
    }
}


/// The `[core]` section: the management server and polling cadence.
#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct CoreConfig {
    pub server:      Url,
    pub polling:     bool,
    pub polling_sec: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            server:      "http://127.0.0.1:8080".parse().unwrap(),
            polling:     true,
            polling_sec: 10,
        }
    }
}


/// The `[device]` section: identity and local paths.
#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub uuid:        Uuid,
    pub system_info: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            uuid:        Uuid::nil(),
            system_info: None,
        }
    }
}


/// The `[discovery]` section.
#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub ipuptane: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig { ipuptane: false }
    }
}


/// Where a TLS credential comes from.
#[derive(Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum CryptoSource {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "pkcs11")]
    Pkcs11,
}

/// The `[tls]` section: the gateway server and credential sources.
#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct TlsConfig {
    pub server:      Url,
    pub ca_source:   CryptoSource,
    pub cert_source: CryptoSource,
    pub pkey_source: CryptoSource,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            server:      "http://127.0.0.1:8000".parse().unwrap(),
            ca_source:   CryptoSource::File,
            cert_source: CryptoSource::File,
            pkey_source: CryptoSource::File,
        }
    }
}


/// The package manager used for installs on the primary.
#[derive(Deserialize, PartialEq, Eq, Debug, Clone)]
pub enum PacManKind {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "ostree")]
    Ostree,
    #[serde(rename = "binary")]
    Binary,
}

impl FromStr for PacManKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none"   => Ok(PacManKind::None),
            "ostree" => Ok(PacManKind::Ostree),
            "binary" => Ok(PacManKind::Binary),
            _ => Err(Error::Parse(format!("unknown package manager: {}", s)))
        }
    }
}

/// The `[pacman]` section.
#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct PacManConfig {
    #[serde(rename = "type")]
    pub kind:          PacManKind,
    pub sysroot:       String,
    pub ostree_server: Option<Url>,
}

impl Default for PacManConfig {
    fn default() -> Self {
        PacManConfig {
            kind:          PacManKind::None,
            sysroot:       "/sysroot".into(),
            ostree_server: None,
        }
    }
}


/// The storage backend holding metadata, keys and downloaded images.
#[derive(Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum StorageKind {
    #[serde(rename = "filesystem")]
    Filesystem,
    #[serde(rename = "sqlite")]
    Sqlite,
}

impl FromStr for StorageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filesystem" => Ok(StorageKind::Filesystem),
            "sqlite"     => Ok(StorageKind::Sqlite),
            _ => Err(Error::Parse(format!("unknown storage backend: {}", s)))
        }
    }
}

/// The `[storage]` section.
#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            kind: StorageKind::Filesystem,
            path: "/var/sota".into(),
        }
    }
}


/// The `[telemetry]` section.
#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub report_network: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig { report_network: true }
    }
}


/// Whether a secondary that failed a metadata send still receives firmware.
#[derive(Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum SecondaryPolicy {
    #[serde(rename = "continue")]
    Continue,
    #[serde(rename = "skip_firmware")]
    SkipFirmware,
}

/// The `[uptane]` section: repository addresses and the primary's identity.
#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct UptaneConfig {
    pub director_server:          Url,
    pub repo_server:              Url,
    pub primary_ecu_serial:       EcuSerial,
    pub primary_ecu_hardware_id:  HardwareId,
    pub key_type:                 KeyType,
    pub private_key_path:         String,
    pub public_key_path:          String,
    pub secondary_policy:         SecondaryPolicy,
    pub max_root_size:            u64,
    pub max_timestamp_size:       u64,
    pub max_meta_size:            u64,
}

impl Default for UptaneConfig {
    fn default() -> Self {
        UptaneConfig {
            director_server:         "http://127.0.0.1:8001/director".parse().unwrap(),
            repo_server:             "http://127.0.0.1:8002/repo".parse().unwrap(),
            primary_ecu_serial:      EcuSerial::unknown(),
            primary_ecu_hardware_id: HardwareId::unknown(),
            key_type:                KeyType::Rsa2048,
            private_key_path:        "uptane_private_key".into(),
            public_key_path:         "uptane_public_key".into(),
            secondary_policy:        SecondaryPolicy::Continue,
            max_root_size:           64 * 1024,
            max_timestamp_size:      16 * 1024,
            max_meta_size:           8 * 1024 * 1024,
        }
    }
}


/// The transport a secondary is reached over. Only the virtual transport is
/// implemented in-process; the rest are served by external bridges.
#[derive(Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum SecondaryKind {
    #[serde(rename = "virtual")]
    Virtual,
    #[serde(rename = "ip_uptane")]
    IpUptane,
    #[serde(rename = "opcua_uptane")]
    OpcuaUptane,
    #[serde(rename = "isotp_uptane")]
    IsoTpUptane,
    #[serde(rename = "legacy")]
    Legacy,
}

impl FromStr for SecondaryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "virtual"      => Ok(SecondaryKind::Virtual),
            "ip_uptane"    => Ok(SecondaryKind::IpUptane),
            "opcua_uptane" => Ok(SecondaryKind::OpcuaUptane),
            "isotp_uptane" => Ok(SecondaryKind::IsoTpUptane),
            "legacy"       => Ok(SecondaryKind::Legacy),
            _ => Err(Error::Parse(format!("unknown secondary type: {}", s)))
        }
    }
}

/// One `[[secondary]]` entry.
#[derive(Deserialize, PartialEq, Debug, Clone)]
pub struct SecondaryConfig {
    #[serde(rename = "type")]
    pub kind:              SecondaryKind,
    pub ecu_serial:        EcuSerial,
    pub ecu_hardware_id:   HardwareId,
    #[serde(default)]
    pub partial_verifying: bool,
    #[serde(default)]
    pub full_client_dir:   String,
    #[serde(default)]
    pub metadata_path:     String,
    #[serde(default)]
    pub firmware_path:     String,
    #[serde(default)]
    pub target_name_path:  String,
}
