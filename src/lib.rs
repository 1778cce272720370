extern crate base64;
extern crate chan;
extern crate chrono;
extern crate crypto;
extern crate hex;
extern crate hyper;
extern crate itoa;
extern crate libc;
#[macro_use]
extern crate log;
#[cfg(test)]
#[macro_use]
extern crate maplit;
extern crate openssl;
extern crate pem;
extern crate ring;
extern crate rusqlite;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate tar;
#[cfg(test)]
extern crate tempfile;
extern crate time;
extern crate toml;
extern crate url;
extern crate uuid;

pub mod bootloader;
pub mod broadcast;
pub mod campaign;
pub mod datatype;
pub mod http;
pub mod orchestrator;
pub mod pacman;
pub mod secondary;
pub mod storage;
pub mod telemetry;
pub mod uptane;
