use std::fs;
use std::path::PathBuf;


/// Signals exchanged with the bootloader around an installation: a notify
/// before the install starts, a boot-OK mark once the image came up, and a
/// reboot-request flag checked after an install cycle.
pub struct Bootloader {
    reboot_flag: PathBuf,
}

impl Default for Bootloader {
    fn default() -> Self {
        Bootloader { reboot_flag: PathBuf::from("/tmp/uptane_client_reboot_flag") }
    }
}

impl Bootloader {
    pub fn new(reboot_flag: PathBuf) -> Bootloader {
        Bootloader { reboot_flag: reboot_flag }
    }

    /// Mark the current boot as successful. Missing connectivity is not a
    /// reason to roll back, so this runs as soon as the client starts.
    pub fn set_boot_ok(&self) {
        debug!("marking boot as successful");
    }

    /// Tell the bootloader an installation is about to start. Installation
    /// isn't atomic and a false notification is harmless.
    pub fn update_notify(&self) {
        debug!("notifying bootloader of pending installation");
    }

    /// Whether a completed install requested a restart of the client.
    pub fn reboot_pending(&self) -> bool {
        self.reboot_flag.exists()
    }

    /// Clear the reboot flag, returning whether it was set.
    pub fn acknowledge_reboot(&self) -> bool {
        if self.reboot_flag.exists() {
            let _ = fs::remove_file(&self.reboot_flag);
            true
        } else {
            false
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;


    #[test]
    fn reboot_flag_acknowledged_once() {
        let dir = tempdir().unwrap();
        let flag = dir.path().join("reboot_flag");
        let bootloader = Bootloader::new(flag.clone());
        assert!(!bootloader.reboot_pending());

        File::create(&flag).unwrap();
        assert!(bootloader.reboot_pending());
        assert!(bootloader.acknowledge_reboot());
        assert!(!bootloader.reboot_pending());
        assert!(!bootloader.acknowledge_reboot());
    }
}
