use base64::DecodeError as Base64Error;
use chrono::ParseError as ChronoParseError;
use hex::FromHexError;
use hyper::error::Error as HyperError;
use openssl::error::ErrorStack as OpensslErrors;
use pem::Error as PemError;
use rusqlite::Error as SqlError;
use serde_json::Error as SerdeJsonError;
use std::convert::From;
use std::fmt::{self, Display, Formatter};
use std::io::Error as IoError;
use std::str::Utf8Error;
use std::string::FromUtf8Error;
use std::sync::PoisonError;
use std::sync::mpsc::{SendError, RecvError};
use toml::de::Error as TomlError;
use url::ParseError as UrlParseError;

use datatype::{Command, Event};
use http::ResponseData;


/// System-wide errors that are returned from `Result` type failures.
#[derive(Debug)]
pub enum Error {
    BadSignatures(String),
    Base64(Base64Error),
    Campaign(String),
    Canonical(String),
    Client(String),
    Command(String),
    Config(String),
    DateTime(ChronoParseError),
    ExpiredMetadata(String),
    FromUtf8(FromUtf8Error),
    HardwareMismatch(String),
    Hex(FromHexError),
    Http(ResponseData),
    Hyper(HyperError),
    IllegalThreshold(String),
    InvariantViolation(String),
    Io(IoError),
    Json(SerdeJsonError),
    KeyId(String),
    KeyNotFound(String),
    KeySign(String),
    MismatchedTargets(String),
    MissingRepo(String),
    NotFound(String),
    Openssl(OpensslErrors),
    OsTree(String),
    PacMan(String),
    Parse(String),
    Pem(PemError),
    Poison(String),
    Recv(RecvError),
    RollbackAttack(String),
    Secondary(String),
    SendCommand(SendError<Command>),
    SendEvent(SendError<Event>),
    Sql(SqlError),
    Storage(String),
    SystemInfo(String),
    Toml(TomlError),
    TooLarge(String),
    TufKeyType(String),
    TufRole(String),
    TufSigType(String),
    UnmetThreshold(String),
    UrlParse(UrlParseError),
    Utf8(Utf8Error),
    ValidationFailed(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let inner: String = match *self {
            Error::BadSignatures(ref err)      => format!("Unverifiable signatures: {}", err),
            Error::Base64(ref err)             => format!("Base64 parse error: {}", err),
            Error::Campaign(ref err)           => format!("Campaign parse error: {}", err),
            Error::Canonical(ref err)          => format!("Canonical JSON error: {}", err),
            Error::Client(ref err)             => format!("HTTP client error: {}", err),
            Error::Command(ref err)            => format!("Unknown command: {}", err),
            Error::Config(ref err)             => format!("Bad config: {}", err),
            Error::DateTime(ref err)           => format!("DateTime parse error: {}", err),
            Error::ExpiredMetadata(ref err)    => format!("Expired metadata: {}", err),
            Error::FromUtf8(ref err)           => format!("From utf8 error: {}", err),
            Error::HardwareMismatch(ref err)   => format!("Hardware identifier mismatch: {}", err),
            Error::Hex(ref err)                => format!("Not valid hex data: {}", err),
            Error::Http(ref err)               => format!("HTTP response error: {}", err),
            Error::Hyper(ref err)              => format!("Hyper error: {}", err),
            Error::IllegalThreshold(ref err)   => format!("Illegal signature threshold: {}", err),
            Error::InvariantViolation(ref err) => format!("Storage invariant violated: {}", err),
            Error::Io(ref err)                 => format!("IO error: {}", err),
            Error::Json(ref err)               => format!("JSON parse error: {}", err),
            Error::KeyId(ref err)              => format!("Invalid key id: {}", err),
            Error::KeyNotFound(ref err)        => format!("Key not found: {}", err),
            Error::KeySign(ref err)            => format!("Key signing error: {}", err),
            Error::MismatchedTargets(ref err)  => format!("Director and Images targets disagree: {}", err),
            Error::MissingRepo(ref err)        => format!("Missing repository metadata: {}", err),
            Error::NotFound(ref err)           => format!("Not found: {}", err),
            Error::Openssl(ref err)            => format!("OpenSSL errors: {}", err),
            Error::OsTree(ref err)             => format!("OSTree error: {}", err),
            Error::PacMan(ref err)             => format!("Package manager error: {}", err),
            Error::Parse(ref err)              => format!("Parse error: {}", err),
            Error::Pem(ref err)                => format!("PEM parse error: {}", err),
            Error::Poison(ref err)             => format!("Poison error: {}", err),
            Error::Recv(ref err)               => format!("Recv error: {}", err),
            Error::RollbackAttack(ref err)     => format!("Rollback attack: {}", err),
            Error::Secondary(ref err)          => format!("Secondary error: {}", err),
            Error::SendCommand(ref err)        => format!("Command send error: {}", err),
            Error::SendEvent(ref err)          => format!("Event send error: {}", err),
            Error::Sql(ref err)                => format!("SQL error: {}", err),
            Error::Storage(ref err)            => format!("Storage error: {}", err),
            Error::SystemInfo(ref err)         => format!("System info error: {}", err),
            Error::Toml(ref err)               => format!("TOML error: {:?}", err),
            Error::TooLarge(ref err)           => format!("Download exceeds size limit: {}", err),
            Error::TufKeyType(ref err)         => format!("Invalid TUF key type: {}", err),
            Error::TufRole(ref err)            => format!("Invalid TUF role: {}", err),
            Error::TufSigType(ref err)         => format!("Invalid TUF signature type: {}", err),
            Error::UnmetThreshold(ref err)     => format!("Signature threshold not met: {}", err),
            Error::UrlParse(ref err)           => format!("Url parse error: {}", err),
            Error::Utf8(ref err)               => format!("Utf8 error: {}", err),
            Error::ValidationFailed(ref err)   => format!("Image validation failed: {}", err),
        };
        write!(f, "{}", inner)
    }
}

impl<E> From<PoisonError<E>> for Error {
    fn from(err: PoisonError<E>) -> Error {
        Error::Poison(err.to_string())
    }
}


macro_rules! derive_from {
    ([ $( $from: ident => $to: ident ),* ]) => {
        $(impl From<$from> for Error {
            fn from(err: $from) -> Error {
                Error::$to(err)
            }
        })*
    };

    ([ $( $error: ident < $ty: ty > => $to: ident),* ]) => {
        $(impl From<$error<$ty>> for Error {
            fn from(err: $error<$ty>) -> Error {
                Error::$to(err)
            }
        })*
    };
}

derive_from!([
    Base64Error      => Base64,
    ChronoParseError => DateTime,
    FromHexError     => Hex,
    FromUtf8Error    => FromUtf8,
    HyperError       => Hyper,
    IoError          => Io,
    OpensslErrors    => Openssl,
    PemError         => Pem,
    RecvError        => Recv,
    ResponseData     => Http,
    SerdeJsonError   => Json,
    SqlError         => Sql,
    TomlError        => Toml,
    UrlParseError    => UrlParse,
    Utf8Error        => Utf8
]);

derive_from!([
    SendError<Command> => SendCommand,
    SendError<Event>   => SendEvent
]);
