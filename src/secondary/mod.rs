pub mod bus;
pub mod virt;

pub use self::bus::SecondaryBus;
pub use self::virt::VirtualSecondary;

use datatype::{EcuSerial, Error, HardwareId, Key, SecondaryConfig, SecondaryKind, TufSigned};


/// The six documents a secondary needs to verify an install cycle on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaPack {
    pub director_root:    Vec<u8>,
    pub director_targets: Vec<u8>,
    pub image_root:       Vec<u8>,
    pub image_timestamp:  Vec<u8>,
    pub image_snapshot:   Vec<u8>,
    pub image_targets:    Vec<u8>,
}

/// The capability set every secondary exposes, whatever its transport.
pub trait Secondary: Send {
    fn serial(&self) -> EcuSerial;
    fn hw_id(&self) -> HardwareId;
    fn public_key(&self) -> Result<Key, Error>;

    /// The secondary's signed version report for the vehicle manifest.
    fn manifest(&self) -> Result<TufSigned, Error>;

    /// The secondary's current Root version for a repository, or -1 when
    /// unsupported or unknown.
    fn root_version(&self, director: bool) -> i64;
    /// Apply one Root version during rotation catch-up.
    fn put_root(&mut self, bytes: &[u8], director: bool) -> Result<(), Error>;
    /// Deliver the full metadata pack for an install cycle.
    fn put_metadata(&mut self, meta: &MetaPack) -> Result<(), Error>;
    /// Deliver the image bytes, or a credentials archive for OSTree ECUs.
    fn send_firmware(&mut self, image: &[u8]) -> Result<(), Error>;
}

/// Construct the in-process handle for a configured secondary. Network
/// transports are bridged by external daemons and can't be built here.
pub fn from_config(config: &SecondaryConfig) -> Result<Box<Secondary>, Error> {
    match config.kind {
        SecondaryKind::Virtual => Ok(Box::new(VirtualSecondary::new(config)?)),
        kind => Err(Error::Secondary(format!("no in-process transport for {:?} secondary {}",
                                             kind, config.ecu_serial)))
    }
}
