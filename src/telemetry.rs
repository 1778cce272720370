use serde_json as json;
use std::process::Command;

use datatype::{Error, Url, Util};
use http::{Client, Response};
use storage::Storage;


/// Best-effort device reports sent to the management server. Failures are
/// logged and never retried; the next cycle sends fresh data anyway.

fn put_report(client: &Client, url: Url, body: json::Value) -> Result<(), Error> {
    let rx = client.put(url, Some(json::to_vec(&body)?));
    match rx.recv() {
        Some(Response::Success(_)) => Ok(()),
        Some(Response::Failed(data)) => Err(Error::Http(data)),
        Some(Response::Error(err)) => Err(*err),
        None => Err(Error::Client("no response to report".into()))
    }
}

/// Run the configured system-info command and `PUT` its output.
pub fn report_hw_info(client: &Client, server: &Url, system_info: &Option<String>) {
    let cmd = match *system_info {
        Some(ref cmd) => cmd.clone(),
        None => return
    };
    let report = || -> Result<(), Error> {
        let output = Command::new("sh").arg("-c").arg(&cmd).output()
            .map_err(|err| Error::SystemInfo(format!("couldn't run `{}`: {}", cmd, err)))?;
        let info = json::from_slice(&output.stdout)
            .map_err(|err| Error::SystemInfo(format!("`{}` output isn't JSON: {}", cmd, err)))?;
        put_report(client, server.join("core/system_info"), info)
    }();
    if let Err(err) = report {
        error!("couldn't report hardware info: {}", err);
    }
}

/// `PUT` the installed-version log as the package report.
pub fn report_installed_packages(client: &Client, server: &Url, storage: &Storage) {
    let report = || -> Result<(), Error> {
        let versions = storage.load_installed_versions()?;
        put_report(client, server.join("core/installed"), json::to_value(versions)?)
    }();
    if let Err(err) = report {
        error!("couldn't report installed packages: {}", err);
    }
}

/// `PUT` the current network info, but only when it changed since the last
/// successful report.
pub fn report_network_info(client: &Client, server: &Url, enabled: bool,
                           last_reported: &mut Option<json::Value>) {
    if ! enabled {
        debug!("not reporting network information because telemetry is disabled");
        return;
    }
    let info = network_info();
    if last_reported.as_ref() == Some(&info) {
        return;
    }
    match put_report(client, server.join("system_info/network"), info.clone()) {
        Ok(()) => { *last_reported = Some(info); }
        Err(err) => error!("couldn't report network info: {}", err)
    }
}

fn network_info() -> json::Value {
    let hostname = Util::read_file("/etc/hostname").ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|| "unknown".into());
    let mut info = json::Map::new();
    info.insert("hostname".into(), hostname.into());
    json::Value::Object(info)
}
