pub mod canonical;
pub mod command;
pub mod config;
pub mod ecu;
pub mod error;
pub mod event;
pub mod install;
pub mod network;
pub mod signature;
pub mod tuf;
pub mod util;

pub use self::canonical::{CanonicalJson, canonicalize_json};
pub use self::command::Command;
pub use self::config::{Config, CoreConfig, CryptoSource, DeviceConfig, DiscoveryConfig,
                       PacManConfig, PacManKind, SecondaryConfig, SecondaryKind,
                       SecondaryPolicy, StorageConfig, StorageKind, TelemetryConfig,
                       TlsConfig, UptaneConfig};
pub use self::ecu::{EcuRecord, EcuRole, EcuSerial, EcuState, HardwareId, MisconfiguredEcu};
pub use self::error::Error;
pub use self::event::Event;
pub use self::install::{InstallCode, InstallOutcome, InstallResult, InstalledVersion};
pub use self::network::{Method, Url};
pub use self::signature::{CryptoToken, Signature, SignatureType};
pub use self::tuf::{EcuCustom, EcuManifests, EcuVersion, Key, KeyType, KeyValue,
                    PrivateKey, RepoName, RoleData, RoleMeta, RoleName, Target,
                    TufCustom, TufImage, TufMeta, TufSigned, extract_version};
pub use self::util::Util;
