use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

use datatype::{Error, InstallCode, InstallOutcome, Target};
use storage::Storage;


/// Copy a committed target image into the install directory. The write goes
/// through a scratch name so a power cut never leaves a half-written image
/// under the final name.
pub fn install(install_dir: &str, storage: &mut Storage, target: &Target)
               -> Result<InstallOutcome, Error> {
    let dir = Path::new(install_dir);
    fs::create_dir_all(dir)?;
    let dest = dir.join(&target.filename);
    let part = dir.join(format!(".{}.part", target.filename));

    let mut reader = match storage.open_target_file(&target.filename) {
        Ok(reader) => reader,
        Err(err) => {
            return Ok(InstallOutcome::new(InstallCode::VALIDATION_FAILED, "".into(),
                                          format!("target not in storage: {}", err)));
        }
    };

    let outcome = || -> Result<(), Error> {
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&part)?;
        io::copy(&mut reader, &mut file)?;
        file.sync_all()?;
        fs::rename(&part, &dest)?;
        Ok(())
    }();

    match outcome {
        Ok(()) => Ok(InstallOutcome::empty(InstallCode::OK)),
        Err(err) => {
            let _ = fs::remove_file(&part);
            Ok(InstallOutcome::new(InstallCode::INSTALL_FAILED, "".into(), format!("{}", err)))
        }
    }
}
