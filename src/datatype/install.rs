use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde::de::Error as SerdeError;
use serde_json as json;
use std::collections::HashMap;
use std::str::FromStr;

use datatype::{EcuSerial, Error};


/// The installation outcome from a package manager.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct InstallOutcome {
    code:   InstallCode,
    stdout: String,
    stderr: String,
}

impl InstallOutcome {
    /// Create a new installation outcome.
    pub fn new(code: InstallCode, stdout: String, stderr: String) -> InstallOutcome {
        InstallOutcome { code: code, stdout: stdout, stderr: stderr }
    }

    pub fn empty(code: InstallCode) -> InstallOutcome {
        InstallOutcome { code: code, stdout: "".into(), stderr: "".into() }
    }

    pub fn code(&self) -> &InstallCode {
        &self.code
    }

    /// Convert an `InstallOutcome` into an `InstallResult` for a target file.
    pub fn into_result(self, filename: String) -> InstallResult {
        let text = match (self.stdout.len(), self.stderr.len()) {
            (0, 0) => "".to_string(),
            (_, 0) => self.stdout,
            (0, _) => self.stderr,
            (_, _) => format!("stdout: {}\nstderr: {}", self.stdout, self.stderr)
        };
        InstallResult::new(filename, self.code, text)
    }
}


/// An encodable report of an installation attempt, attached to version
/// manifests as `custom.operation_result`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct InstallResult {
    pub id:          String,
    pub result_code: InstallCode,
    pub result_text: String,
}

impl InstallResult {
    pub fn new(id: String, code: InstallCode, text: String) -> InstallResult {
        InstallResult { id: id, result_code: code, result_text: text }
    }
}


/// One entry in the append-only log of versions installed on an ECU.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InstalledVersion {
    pub ecu_serial:   EcuSerial,
    pub filename:     String,
    pub hashes:       HashMap<String, String>,
    pub length:       u64,
    pub installed_at: DateTime<Utc>,
}


/// Enumerate the possible outcomes when trying to install a package.
#[allow(non_camel_case_types)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallCode {
    /// Operation executed successfully
    OK = 0,
    /// Operation has already been processed
    ALREADY_PROCESSED,
    /// Dependency failure during package install, upgrade, or removal
    DEPENDENCY_FAILURE,
    /// Update image integrity has been compromised
    VALIDATION_FAILED,
    /// Package installation failed
    INSTALL_FAILED,
    /// Package upgrade failed
    UPGRADE_FAILED,
    /// Package removal failed
    REMOVAL_FAILED,
    /// The module loader could not flash its managed module
    FLASH_FAILED,
    /// Partition creation failed
    CREATE_PARTITION_FAILED,
    /// Partition deletion failed
    DELETE_PARTITION_FAILED,
    /// Partition resize failed
    RESIZE_PARTITION_FAILED,
    /// Partition write failed
    WRITE_PARTITION_FAILED,
    /// Partition patching failed
    PATCH_PARTITION_FAILED,
    /// User declined the update
    USER_DECLINED,
    /// Software was blacklisted
    SOFTWARE_BLACKLISTED,
    /// Ran out of disk space
    DISK_FULL,
    /// Software package not found
    NOT_FOUND,
    /// Tried to downgrade to older version
    OLD_VERSION,
    /// SWM Internal integrity error
    INTERNAL_ERROR,
    /// Other error
    GENERAL_ERROR,
    /// The installation was started but has not yet finished
    IN_PROGRESS,
}

impl InstallCode {
    /// Was the installation successful?
    pub fn is_success(&self) -> bool {
        match *self {
            InstallCode::OK | InstallCode::ALREADY_PROCESSED => true,
            _ => false
        }
    }
}

impl Default for InstallCode {
    fn default() -> Self {
        InstallCode::OK
    }
}

impl FromStr for InstallCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<InstallCode, Error> {
        match &*s.to_uppercase() {
            "0"  | "OK"                      => Ok(InstallCode::OK),
            "1"  | "ALREADY_PROCESSED"       => Ok(InstallCode::ALREADY_PROCESSED),
            "2"  | "DEPENDENCY_FAILURE"      => Ok(InstallCode::DEPENDENCY_FAILURE),
            "3"  | "VALIDATION_FAILED"       => Ok(InstallCode::VALIDATION_FAILED),
            "4"  | "INSTALL_FAILED"          => Ok(InstallCode::INSTALL_FAILED),
            "5"  | "UPGRADE_FAILED"          => Ok(InstallCode::UPGRADE_FAILED),
            "6"  | "REMOVAL_FAILED"          => Ok(InstallCode::REMOVAL_FAILED),
            "7"  | "FLASH_FAILED"            => Ok(InstallCode::FLASH_FAILED),
            "8"  | "CREATE_PARTITION_FAILED" => Ok(InstallCode::CREATE_PARTITION_FAILED),
            "9"  | "DELETE_PARTITION_FAILED" => Ok(InstallCode::DELETE_PARTITION_FAILED),
            "10" | "RESIZE_PARTITION_FAILED" => Ok(InstallCode::RESIZE_PARTITION_FAILED),
            "11" | "WRITE_PARTITION_FAILED"  => Ok(InstallCode::WRITE_PARTITION_FAILED),
            "12" | "PATCH_PARTITION_FAILED"  => Ok(InstallCode::PATCH_PARTITION_FAILED),
            "13" | "USER_DECLINED"           => Ok(InstallCode::USER_DECLINED),
            "14" | "SOFTWARE_BLACKLISTED"    => Ok(InstallCode::SOFTWARE_BLACKLISTED),
            "15" | "DISK_FULL"               => Ok(InstallCode::DISK_FULL),
            "16" | "NOT_FOUND"               => Ok(InstallCode::NOT_FOUND),
            "17" | "OLD_VERSION"             => Ok(InstallCode::OLD_VERSION),
            "18" | "INTERNAL_ERROR"          => Ok(InstallCode::INTERNAL_ERROR),
            "19" | "GENERAL_ERROR"           => Ok(InstallCode::GENERAL_ERROR),
            "20" | "IN_PROGRESS"             => Ok(InstallCode::IN_PROGRESS),
            _ => Err(Error::Parse(format!("unknown InstallCode: {}", s)))
        }
    }
}

impl Serialize for InstallCode {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(self.clone() as u64)
    }
}

impl<'de> Deserialize<'de> for InstallCode {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<InstallCode, D::Error> {
        match Deserialize::deserialize(de)? {
            json::Value::Number(ref n) if n.is_u64() => {
                format!("{}", n).parse().map_err(|err: Error| SerdeError::custom(err.to_string()))
            }
            json::Value::String(ref s) => s.parse().map_err(|err: Error| SerdeError::custom(err.to_string())),
            val => Err(SerdeError::custom(format!("not an InstallCode: {}", val)))
        }
    }
}
