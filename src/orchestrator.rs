use chan::{Receiver, Sender};
use chrono::Utc;
use libc;
use serde_json as json;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::process;

use bootloader::Bootloader;
use datatype::{Command, Config, CryptoToken, EcuRecord, EcuRole, EcuSerial, Error, Event,
               HardwareId, InstallCode, InstallResult, InstalledVersion, Key, KeyValue,
               PrivateKey, RepoName, RoleName, Target, Util, extract_version};
use http::{Client, HyperClient, Response};
use pacman::{Credentials, PacMan};
use secondary::{self, SecondaryBus};
use storage::{Storage, open_storage};
use telemetry;
use uptane::{DirectorRepo, Fetcher, ImagesRepo, ManifestSigner, has_pending_updates,
             primary_report};


/// The orchestrator's position in an update cycle, for logging and tests.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum State {
    Unprovisioned,
    Idle,
    Fetching,
    Verifying,
    Downloading,
    Installing,
    Reporting,
    Shutdown,
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}


/// The top-level update state machine. Commands are consumed strictly one at
/// a time; recoverable verification failures become a log line plus a
/// `TimestampUpdated` fallback event, never a crash of the loop.
pub struct Orchestrator {
    pub config:     Config,
    pub storage:    Box<Storage>,
    pub director:   DirectorRepo,
    pub images:     ImagesRepo,
    pub fetcher:    Fetcher,
    pub signer:     ManifestSigner,
    pub bus:        SecondaryBus,
    pub pacman:     PacMan,
    pub bootloader: Bootloader,
    pub http:       Box<Client>,

    state:        State,
    ecus:         HashMap<EcuSerial, HardwareId>,
    last_result:  Option<InstallResult>,
    last_network: Option<json::Value>,
    _crypto:      CryptoToken,
}

impl Orchestrator {
    /// Build the production orchestrator from config alone.
    pub fn new(config: Config) -> Result<Orchestrator, Error> {
        let storage = open_storage(&config.storage)?;
        let http = Box::new(HyperClient::default());
        let pacman = PacMan::from_config(&config.pacman);
        let bus = SecondaryBus::new(config.uptane.secondary_policy);
        Orchestrator::from_parts(config, storage, http, None, bus, pacman)
    }

    /// Wire up an orchestrator from externally constructed parts. A `None`
    /// signer is read from storage, falling back to the configured key files.
    pub fn from_parts(config: Config, mut storage: Box<Storage>, http: Box<Client>,
                      signer: Option<ManifestSigner>, mut bus: SecondaryBus, pacman: PacMan)
                      -> Result<Orchestrator, Error> {
        let crypto = CryptoToken::init()?;
        let signer = match signer {
            Some(signer) => signer,
            None => load_signer(&config, &mut *storage)?
        };

        if config.discovery.ipuptane {
            info!("IP secondaries announce themselves through the transport bridge");
        }
        for secondary_config in &config.secondaries {
            match secondary::from_config(secondary_config) {
                Ok(secondary) => bus.register(secondary),
                Err(err) => error!("couldn't set up secondary {}: {}", secondary_config.ecu_serial, err),
            }
        }

        let roster = load_roster(&config, &mut *storage, &bus)?;
        let misconfigured = bus.verify_against_roster(&roster, &signer.primary_ecu);
        if ! misconfigured.is_empty() {
            storage.store_misconfigured_ecus(&misconfigured)?;
        }
        let mut ecus = HashMap::new();
        for ecu in &roster {
            ecus.insert(ecu.serial.clone(), ecu.hw_id.clone());
        }
        let fetcher = Fetcher::new(&config.uptane);

        Ok(Orchestrator {
            config:     config,
            storage:    storage,
            director:   DirectorRepo::new(),
            images:     ImagesRepo::new(),
            fetcher:    fetcher,
            signer:     signer,
            bus:        bus,
            pacman:     pacman,
            bootloader: Bootloader::default(),
            http:       http,

            state:        State::Idle,
            ecus:         ecus,
            last_result:  None,
            last_network: None,
            _crypto:      crypto,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn set_state(&mut self, next: State) {
        trace!("state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Process commands until `Shutdown` or a hangup of the command channel.
    pub fn run(&mut self, crx: Receiver<Command>, etx: Sender<Event>) {
        self.bootloader.set_boot_ok();
        telemetry::report_hw_info(&*self.http, &self.config.core.server, &self.config.device.system_info);
        telemetry::report_installed_packages(&*self.http, &self.config.core.server, &*self.storage);
        telemetry::report_network_info(&*self.http, &self.config.core.server,
                                       self.config.telemetry.report_network, &mut self.last_network);

        loop {
            let command = match crx.recv() {
                Some(command) => command,
                None => break
            };
            info!("got {} command", command);

            match command {
                Command::CheckForUpdates => {
                    if let Err(err) = self.put_manifest() {
                        error!("failed to send vehicle manifest: {}", err);
                    }
                    telemetry::report_network_info(&*self.http, &self.config.core.server,
                                                   self.config.telemetry.report_network,
                                                   &mut self.last_network);
                    match ::campaign::fetch_available(&*self.http, &self.config.core.server) {
                        Ok(campaigns) => for campaign in campaigns {
                            info!("campaign available: {} ({})", campaign.name, campaign.id);
                        },
                        Err(err) => debug!("couldn't fetch campaigns: {}", err),
                    }
                    match self.uptane_iteration(&etx) {
                        Ok(()) => (),
                        Err(err) => {
                            error!("update iteration failed: {}", err);
                            etx.send(Event::TimestampUpdated);
                        }
                    }
                    self.set_state(State::Idle);
                }

                Command::Install(targets) => {
                    if let Err(err) = self.uptane_install(targets, &etx) {
                        error!("install cycle failed: {}", err);
                        etx.send(Event::Error(format!("{}", err)));
                    }
                    self.set_state(State::Idle);
                }

                Command::SendManifest => {
                    match self.put_manifest() {
                        Ok(true) => etx.send(Event::ManifestSent),
                        Ok(false) => (),
                        Err(err) => error!("failed to send vehicle manifest: {}", err),
                    }
                }

                Command::Shutdown => {
                    self.set_state(State::Shutdown);
                    break;
                }
            }
        }
    }

    /// One poll of both repositories: Director chain first, then target
    /// reconciliation, then the Images chain, then downloads.
    pub fn uptane_iteration(&mut self, etx: &Sender<Event>) -> Result<(), Error> {
        self.set_state(State::Fetching);
        let changed = self.update_director_meta()?;
        if ! changed {
            debug!("no change in director targets");
            etx.send(Event::TimestampUpdated);
            return Ok(());
        }

        self.set_state(State::Verifying);
        let new_targets = self.compute_new_targets()?;
        if new_targets.is_empty() {
            info!("no new updates");
            etx.send(Event::TimestampUpdated);
            return Ok(());
        }
        info!("got {} new targets", new_targets.len());

        self.update_images_meta()?;

        self.set_state(State::Downloading);
        self.download_targets(&new_targets)?;
        etx.send(Event::TargetsUpdated(new_targets));
        Ok(())
    }

    /// Replay the Director Root chain from storage, catch up with the remote
    /// chain version by version, then verify the latest Targets. Returns
    /// false when the remote Targets version matches the stored one.
    fn update_director_meta(&mut self) -> Result<bool, Error> {
        self.director.reset_meta();

        match self.storage.load_role(RepoName::Director, RoleName::Root, None)? {
            Some(bytes) => self.director.init_root(&bytes)?,
            None => {
                let bytes = self.fetcher.fetch_role(&*self.http, RepoName::Director, RoleName::Root, Some(1))?;
                self.director.init_root(&bytes)?;
                self.storage.store_role(RepoName::Director, RoleName::Root, 1, &bytes)?;
            }
        }

        let latest = self.fetcher.fetch_role(&*self.http, RepoName::Director, RoleName::Root, None)?;
        let remote_version = extract_version(&latest)?;
        for version in (self.director.root_version() + 1)..remote_version + 1 {
            let bytes = self.fetcher.fetch_role(&*self.http, RepoName::Director, RoleName::Root, Some(version))?;
            self.director.verify_root(&bytes)?;
            self.storage.store_role(RepoName::Director, RoleName::Root, version, &bytes)?;
            self.storage.clear_non_root_meta(RepoName::Director)?;
        }
        if self.director.root_expired() {
            return Err(Error::ExpiredMetadata("director root".into()));
        }

        let remote = self.fetcher.fetch_role(&*self.http, RepoName::Director, RoleName::Targets, None)?;
        let local_version = match self.storage.load_role(RepoName::Director, RoleName::Targets, None)? {
            Some(stored) => extract_version(&stored)?,
            None => 0
        };
        let verified = self.director.verify_targets(&remote, local_version)?;
        if ! verified.is_new() {
            return Ok(false);
        }
        self.storage.store_role(RepoName::Director, RoleName::Targets, verified.new_ver, &remote)?;
        Ok(true)
    }

    /// Replay and refresh the Images chain in the fixed order Root,
    /// Timestamp, Snapshot, Targets.
    fn update_images_meta(&mut self) -> Result<(), Error> {
        self.images.reset_meta();

        match self.storage.load_role(RepoName::Images, RoleName::Root, None)? {
            Some(bytes) => self.images.init_root(&bytes)?,
            None => {
                let bytes = self.fetcher.fetch_role(&*self.http, RepoName::Images, RoleName::Root, Some(1))?;
                self.images.init_root(&bytes)?;
                self.storage.store_role(RepoName::Images, RoleName::Root, 1, &bytes)?;
            }
        }

        let latest = self.fetcher.fetch_role(&*self.http, RepoName::Images, RoleName::Root, None)?;
        let remote_version = extract_version(&latest)?;
        for version in (self.images.root_version() + 1)..remote_version + 1 {
            let bytes = self.fetcher.fetch_role(&*self.http, RepoName::Images, RoleName::Root, Some(version))?;
            self.images.verify_root(&bytes)?;
            self.storage.store_role(RepoName::Images, RoleName::Root, version, &bytes)?;
            self.storage.clear_non_root_meta(RepoName::Images)?;
        }
        if self.images.root_expired() {
            return Err(Error::ExpiredMetadata("repo root".into()));
        }

        let timestamp = self.fetcher.fetch_role(&*self.http, RepoName::Images, RoleName::Timestamp, None)?;
        let local = self.stored_version(RepoName::Images, RoleName::Timestamp)?;
        let verified = self.images.verify_timestamp(&timestamp, local)?;
        if verified.is_new() {
            self.storage.store_role(RepoName::Images, RoleName::Timestamp, verified.new_ver, &timestamp)?;
        }

        let targets_local = self.stored_version(RepoName::Images, RoleName::Targets)?;
        let snapshot = self.fetcher.fetch_role(&*self.http, RepoName::Images, RoleName::Snapshot, None)?;
        let local = self.stored_version(RepoName::Images, RoleName::Snapshot)?;
        let verified = self.images.verify_snapshot(&snapshot, local, targets_local)?;
        if verified.is_new() {
            self.storage.store_role(RepoName::Images, RoleName::Snapshot, verified.new_ver, &snapshot)?;
        }

        let targets = self.fetcher.fetch_role(&*self.http, RepoName::Images, RoleName::Targets, None)?;
        let verified = self.images.verify_targets(&targets, targets_local)?;
        if verified.is_new() {
            self.storage.store_role(RepoName::Images, RoleName::Targets, verified.new_ver, &targets)?;
        }
        Ok(())
    }

    fn stored_version(&self, repo: RepoName, role: RoleName) -> Result<u64, Error> {
        match self.storage.load_role(repo, role, None)? {
            Some(bytes) => extract_version(&bytes),
            None => Ok(0)
        }
    }

    /// The most recently installed filename per ECU, from the append-only log.
    fn installed_images(&self) -> Result<HashMap<EcuSerial, String>, Error> {
        let mut installed = HashMap::new();
        for version in self.storage.load_installed_versions()? {
            installed.insert(version.ecu_serial.clone(), version.filename.clone());
        }
        if let Some((filepath, _, _)) = self.pacman.current_image(&*self.storage) {
            installed.insert(self.signer.primary_ecu.clone(), filepath);
        }
        Ok(installed)
    }

    /// Cross-check Director targets against the ECU roster and the installed
    /// log. Unknown serials are warnings; a wrong hardware id is fatal.
    fn compute_new_targets(&mut self) -> Result<Vec<Target>, Error> {
        let installed = self.installed_images()?;
        let mut new_targets = Vec::new();

        for target in self.director.targets() {
            let mut include = false;
            for (serial, hw_id) in target.ecus() {
                match self.ecus.get(&serial) {
                    None => {
                        warn!("unknown ECU ID in director targets metadata: {}", serial);
                        continue;
                    }
                    Some(known) if known != &hw_id => {
                        return Err(Error::HardwareMismatch(format!("ECU {} is {}, director says {}",
                                                                   serial, known, hw_id)));
                    }
                    Some(_) => {
                        if installed.get(&serial) == Some(&target.filename) {
                            trace!("{} already installed on {}", target.filename, serial);
                            continue;
                        }
                        include = true;
                    }
                }
            }
            if include {
                new_targets.push(target);
            }
        }
        Ok(new_targets)
    }

    /// Download and hash-verify every new target under the Images metadata.
    fn download_targets(&mut self, targets: &[Target]) -> Result<(), Error> {
        for target in targets {
            match self.images.get_target(target)? {
                Some(images_target) => {
                    self.fetcher.fetch_verify_target(&*self.http, &mut *self.storage, &images_target, true)?;
                }
                None => error!("no matching target in images targets metadata for {}", target),
            }
        }
        Ok(())
    }

    /// Deliver metadata and images to every affected ECU, install on the
    /// primary where addressed, then report the outcome to the Director.
    pub fn uptane_install(&mut self, updates: Vec<Target>, etx: &Sender<Event>) -> Result<(), Error> {
        self.set_state(State::Installing);
        self.last_result = None;

        let primary_serial = self.signer.primary_ecu.clone();
        let primary_updates = updates.iter()
            .filter(|target| target.ecus().contains_key(&primary_serial))
            .cloned()
            .collect::<Vec<_>>();

        self.bus.send_metadata_to_ecus(&updates, &mut *self.storage, &self.fetcher, &*self.http)
            .unwrap_or_else(|err| error!("couldn't send metadata to secondaries: {}", err));

        // one OS per primary, so at most one primary update per cycle
        if let Some(target) = primary_updates.into_iter().nth(0) {
            self.install_on_primary(&target, etx)?;
        } else {
            info!("no update to install on primary");
        }

        self.bus.send_images_to_ecus(&updates, &mut *self.storage, &self.config.tls, &self.config.pacman);

        self.set_state(State::Reporting);
        if self.put_manifest()? {
            etx.send(Event::ManifestSent);
        }

        if self.bootloader.acknowledge_reboot() {
            if unsafe { libc::getppid() } == 1 {
                // under a supervisor with restart semantics, exiting restarts us
                info!("client updated, exiting for a supervised restart");
                process::exit(0);
            } else {
                info!("client updated, restart required to run the new version");
            }
        }
        Ok(())
    }

    fn install_on_primary(&mut self, target: &Target, etx: &Sender<Event>) -> Result<(), Error> {
        if self.pacman.is_installed(&*self.storage, target) {
            let result = InstallResult::new(target.filename.clone(), InstallCode::ALREADY_PROCESSED,
                                            "Package already installed".into());
            self.last_result = Some(result);
            return Ok(());
        }

        let ostree_format = target.custom.as_ref()
            .and_then(|custom| custom.targetFormat.as_ref())
            .map_or(true, |format| format == "OSTREE");
        if let PacMan::Ostree { .. } = self.pacman {
            if ! ostree_format || target.length != 0 {
                let result = InstallResult::new(target.filename.clone(), InstallCode::VALIDATION_FAILED,
                                                "Cannot install a non-OSTree package on an OSTree system".into());
                etx.send(Event::InstallFailed(result.clone()));
                self.last_result = Some(result);
                return Ok(());
            }
        }

        // installation isn't atomic and a false notification doesn't hurt
        self.bootloader.update_notify();
        let outcome = self.pacman.install(&mut *self.storage, target, &Credentials::default())?;
        let result = outcome.into_result(target.filename.clone());
        if result.result_code == InstallCode::OK {
            self.storage.append_installed_version(&InstalledVersion {
                ecu_serial:   self.signer.primary_ecu.clone(),
                filename:     target.filename.clone(),
                hashes:       target.hashes.clone(),
                length:       target.length,
                installed_at: Utc::now(),
            })?;
        }
        if result.result_code.is_success() {
            etx.send(Event::InstallComplete(result.clone()));
        } else {
            etx.send(Event::InstallFailed(result.clone()));
        }
        self.last_result = Some(result);
        Ok(())
    }

    /// Assemble, sign and `PUT` the vehicle version manifest. Skipped while
    /// any inner report is still in progress.
    pub fn put_manifest(&mut self) -> Result<bool, Error> {
        let installed = self.pacman.current_image(&*self.storage);
        let report = primary_report(self.signer.primary_ecu.clone(), installed, self.last_result.clone());
        let signed = self.signer.sign_report(report)?;
        let manifests = self.signer.assemble(signed, self.bus.collect_reports());
        if has_pending_updates(&manifests) {
            debug!("pending updates, not sending manifest");
            return Ok(false);
        }
        let envelope = self.signer.sign_manifest(manifests)?;
        let rx = self.http.put(self.fetcher.director_server.join("manifest"),
                               Some(json::to_vec(&envelope)?));
        match rx.recv() {
            Some(Response::Success(_)) => Ok(true),
            Some(Response::Failed(data)) => { error!("manifest not accepted: {}", data); Ok(false) }
            Some(Response::Error(err)) => Err(*err),
            None => Err(Error::Client("no response to manifest put".into()))
        }
    }
}

/// Read the primary keypair from storage, falling back to the configured key
/// files on first start. The key id hashes the canonical form of the key,
/// configured type included, so the type must match the material on disk.
fn load_signer(config: &Config, storage: &mut Storage) -> Result<ManifestSigner, Error> {
    let (public, private) = match storage.load_primary_keys()? {
        Some(pair) => pair,
        None => {
            let public = Util::read_file(&config.uptane.public_key_path)?;
            let private = Util::read_file(&config.uptane.private_key_path)?;
            storage.store_primary_keys(&public, &private)?;
            (public, private)
        }
    };
    let key = Key {
        keytype: config.uptane.key_type,
        keyval:  KeyValue { public: String::from_utf8(public)? },
    };
    key.raw_material().map_err(|err| Error::Config(
        format!("uptane.key_type {} doesn't match the primary public key: {}", key.keytype, err)))?;
    Ok(ManifestSigner {
        primary_ecu: config.uptane.primary_ecu_serial.clone(),
        private_key: PrivateKey { keyid: key.key_id()?, der_key: private },
        sig_type:    key.keytype.sig_type(),
    })
}

/// Load the provisioned roster, registering it from config on first start.
fn load_roster(config: &Config, storage: &mut Storage, bus: &SecondaryBus)
               -> Result<Vec<EcuRecord>, Error> {
    let roster = storage.load_ecu_serials()?;
    if ! roster.is_empty() {
        return Ok(roster);
    }

    let mut roster = vec![EcuRecord {
        serial:     config.uptane.primary_ecu_serial.clone(),
        hw_id:      config.uptane.primary_ecu_hardware_id.clone(),
        is_primary: true,
        public_key: None,
        role:       EcuRole::UptaneFull,
        transport:  None,
    }];
    let hw_ids = bus.hw_ids();
    for serial in bus.serials() {
        roster.push(EcuRecord {
            serial:     serial.clone(),
            hw_id:      hw_ids.get(&serial).cloned().unwrap_or_else(HardwareId::unknown),
            is_primary: false,
            public_key: None,
            role:       EcuRole::UptanePartial,
            transport:  None,
        });
    }
    storage.store_ecu_serials(&roster)?;
    storage.store_ecu_registered()?;
    Ok(roster)
}
