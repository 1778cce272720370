extern crate chan;
extern crate chan_signal;
extern crate crossbeam;
extern crate env_logger;
extern crate getopts;
#[macro_use]
extern crate log;
extern crate time;
extern crate uptane;

use chan::{Sender, Receiver};
use chan_signal::Signal;
use env_logger::LogBuilder;
use getopts::Options;
use log::{LogLevelFilter, LogRecord};
use std::{env, process, thread};
use std::time::Duration;

use uptane::broadcast::Broadcast;
use uptane::datatype::{Command, Config, Event};
use uptane::orchestrator::Orchestrator;


macro_rules! exit {
    ($code:expr, $fmt:expr, $($arg:tt)*) => {{
        println!($fmt, $($arg)*);
        process::exit($code);
    }}
}


fn main() {
    let version = start_logging();
    let config = build_config(&version);

    let (ctx, crx) = chan::async::<Command>();
    let (etx, erx) = chan::async::<Event>();
    let mut broadcast = Broadcast::new(erx);

    crossbeam::scope(|scope| {
        let signals = chan_signal::notify(&[Signal::INT, Signal::TERM]);
        let sig_ctx = ctx.clone();
        scope.spawn(move || start_signal_handler(&signals, &sig_ctx));

        if config.core.polling {
            let poll_tick = config.core.polling_sec;
            let poll_ctx = ctx.clone();
            scope.spawn(move || start_update_poller(poll_tick, &poll_ctx));
        }

        let event_log = broadcast.subscribe();
        scope.spawn(move || {
            while let Some(event) = event_log.recv() {
                info!("event: {}", event);
            }
        });

        scope.spawn(move || {
            let mut orchestrator = Orchestrator::new(config)
                .unwrap_or_else(|err| exit!(2, "couldn't start the update client: {}", err));
            orchestrator.run(crx, etx);
            process::exit(0);
        });

        scope.spawn(move || broadcast.run());
    });
}

fn start_logging() -> String {
    let version = option_env!("UPTANE_CLIENT_VERSION").unwrap_or("unknown");

    let mut builder = LogBuilder::new();
    builder.format(move |record: &LogRecord| {
        let timestamp = format!("{}", time::now_utc().rfc3339());
        format!("{} ({}): {} - {}", timestamp, version, record.level(), record.args())
    });
    builder.filter(Some("hyper"), LogLevelFilter::Info);
    builder.parse(&env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string()));
    builder.init().expect("builder already initialized");

    version.to_string()
}

fn start_signal_handler(signals: &Receiver<Signal>, ctx: &Sender<Command>) {
    loop {
        match signals.recv() {
            Some(Signal::INT) | Some(Signal::TERM) => {
                ctx.send(Command::Shutdown);
                return;
            }
            _ => ()
        }
    }
}

fn start_update_poller(interval: u64, ctx: &Sender<Command>) {
    info!("polling for new updates every {} seconds", interval);
    loop {
        thread::sleep(Duration::from_secs(interval));
        ctx.send(Command::CheckForUpdates);
    }
}

fn build_config(version: &str) -> Config {
    let args     = env::args().collect::<Vec<String>>();
    let program  = args[0].clone();
    let mut opts = Options::new();

    opts.optflag("h", "help", "print this help menu then quit");
    opts.optflag("p", "print", "print the parsed config then quit");
    opts.optflag("v", "version", "print the version then quit");
    opts.optopt("c", "config", "change config path", "PATH");

    opts.optopt("", "core-server", "change the management server", "URL");
    opts.optopt("", "core-polling-sec", "change the polling interval", "SECONDS");

    opts.optopt("", "uptane-director-server", "change the Director server", "URL");
    opts.optopt("", "uptane-repo-server", "change the Images repository server", "URL");
    opts.optopt("", "uptane-primary-ecu-serial", "change the primary ECU's serial", "TEXT");
    opts.optopt("", "uptane-primary-ecu-hardware-id", "change the primary ECU's hardware id", "TEXT");
    opts.optopt("", "uptane-key-type", "change the primary's key type", "TYPE");
    opts.optopt("", "uptane-private-key-path", "change the primary's private key path", "PATH");
    opts.optopt("", "uptane-public-key-path", "change the primary's public key path", "PATH");

    opts.optopt("", "pacman-type", "change the package manager", "MANAGER");
    opts.optopt("", "storage-type", "change the storage backend", "BACKEND");
    opts.optopt("", "storage-path", "change the storage location", "PATH");

    let cli = opts.parse(&args[1..]).expect("couldn't parse args");
    if cli.opt_present("help") {
        exit!(0, "{}", opts.usage(&format!("Usage: {} [options]", program)));
    } else if cli.opt_present("version") {
        exit!(0, "{}", version);
    }

    let file = cli.opt_str("config").or_else(|| env::var("UPTANE_CONFIG").ok()).expect("no config provided");
    let mut config = Config::load(&file).unwrap_or_else(|err| exit!(2, "error loading config: {}", err));

    cli.opt_str("core-server").map(|text| config.core.server = text.parse().expect("invalid core-server URL"));
    cli.opt_str("core-polling-sec").map(|secs| config.core.polling_sec = secs.parse().expect("invalid core-polling-sec"));

    cli.opt_str("uptane-director-server").map(|text| config.uptane.director_server = text.parse().expect("invalid uptane-director-server URL"));
    cli.opt_str("uptane-repo-server").map(|text| config.uptane.repo_server = text.parse().expect("invalid uptane-repo-server URL"));
    cli.opt_str("uptane-primary-ecu-serial").map(|text| config.uptane.primary_ecu_serial = text.parse().expect("invalid serial"));
    cli.opt_str("uptane-primary-ecu-hardware-id").map(|text| config.uptane.primary_ecu_hardware_id = text.parse().expect("invalid hardware id"));
    cli.opt_str("uptane-key-type").map(|text| config.uptane.key_type = text.parse().expect("invalid uptane-key-type"));
    cli.opt_str("uptane-private-key-path").map(|text| config.uptane.private_key_path = text);
    cli.opt_str("uptane-public-key-path").map(|text| config.uptane.public_key_path = text);

    cli.opt_str("pacman-type").map(|text| config.pacman.kind = text.parse().expect("invalid pacman-type"));
    cli.opt_str("storage-type").map(|text| config.storage.kind = text.parse().expect("invalid storage-type"));
    cli.opt_str("storage-path").map(|text| config.storage.path = text);

    if cli.opt_present("print") {
        exit!(0, "{:#?}", config);
    }

    config
}
