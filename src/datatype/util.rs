use crypto::digest::Digest;
use crypto::sha2::Sha256;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::Path;

use datatype::Error;


pub struct Util;

impl Util {
    pub fn sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.input(data);
        hasher.result_str()
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, Error> {
        let path = path.as_ref();
        let mut file = BufReader::new(File::open(path)
            .map_err(|err| Error::Client(format!("couldn't open {:?}: {}", path, err)))?);
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|err| Error::Client(format!("couldn't read {:?}: {}", path, err)))?;
        Ok(buf)
    }

    pub fn write_file<P: AsRef<Path>>(path: P, buf: &[u8]) -> Result<(), Error> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|err| Error::Client(format!("couldn't open {:?} for writing: {}", path, err)))?;
        let _ = file.write(buf)
            .map_err(|err| Error::Client(format!("couldn't write to {:?}: {}", path, err)))?;
        file.flush()?;
        Ok(())
    }

    /// Write to a scratch file in the same directory then rename into place, so
    /// a reader never observes a partially written file.
    pub fn write_atomic<P: AsRef<Path>>(path: P, buf: &[u8]) -> Result<(), Error> {
        let path = path.as_ref();
        let dir = path.parent().ok_or_else(|| Error::Parse(format!("no parent directory: {:?}", path)))?;
        let name = path.file_name().ok_or_else(|| Error::Parse(format!("no file name: {:?}", path)))?;
        let temp = dir.join(format!(".{}.tmp", name.to_string_lossy()));
        Util::write_file(&temp, buf)?;
        fs::rename(&temp, path)?;
        Ok(())
    }
}
