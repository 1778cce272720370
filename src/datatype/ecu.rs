use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use datatype::{Error, Key};


const UNKNOWN: &'static str = "<unknown>";


/// The unique serial of an ECU, compared byte-wise.
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Debug, Clone, PartialOrd, Ord)]
#[serde(transparent)]
pub struct EcuSerial(String);

impl EcuSerial {
    pub fn unknown() -> Self {
        EcuSerial(UNKNOWN.into())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for EcuSerial {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EcuSerial(s.into()))
    }
}

impl<'a> From<&'a str> for EcuSerial {
    fn from(s: &'a str) -> Self {
        EcuSerial(s.into())
    }
}

impl Display for EcuSerial {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}


/// The hardware identifier an ECU reports, compared byte-wise.
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Debug, Clone)]
#[serde(transparent)]
pub struct HardwareId(String);

impl HardwareId {
    pub fn unknown() -> Self {
        HardwareId(UNKNOWN.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for HardwareId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(HardwareId(s.into()))
    }
}

impl<'a> From<&'a str> for HardwareId {
    fn from(s: &'a str) -> Self {
        HardwareId(s.into())
    }
}

impl Display for HardwareId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}


/// How an ECU takes part in metadata verification.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum EcuRole {
    #[serde(rename = "legacy")]
    Legacy,
    #[serde(rename = "uptane-full")]
    UptaneFull,
    #[serde(rename = "uptane-partial")]
    UptanePartial,
}

/// A provisioned ECU. Records are created at provisioning time and never
/// mutated afterwards; removal requires a re-provision.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct EcuRecord {
    pub serial:     EcuSerial,
    pub hw_id:      HardwareId,
    pub is_primary: bool,
    pub public_key: Option<Key>,
    pub role:       EcuRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport:  Option<String>,
}


/// Why an observed ECU does not line up with the provisioned roster.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum EcuState {
    /// Present in storage but no longer reported.
    Old,
    /// Reported but never registered.
    NotRegistered,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct MisconfiguredEcu {
    pub serial: EcuSerial,
    pub hw_id:  HardwareId,
    pub state:  EcuState,
}
