use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt::Debug;
use std::process::{Command, Output};
use std::str;

use datatype::{Error, InstallCode, InstallOutcome, Target};
use pacman::Credentials;


fn run<S: AsRef<OsStr> + Debug>(args: &[S]) -> Result<Output, Error> {
    debug!("running `ostree` command with args: {:?}", args);
    Command::new("ostree")
        .args(args)
        .output()
        .map_err(|err| Error::OsTree(err.to_string()))
        .and_then(|output| {
            if output.status.success() {
                Ok(output)
            } else {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                Err(Error::OsTree(format!("stdout: {}\nstderr: {}", stdout, stderr)))
            }
        })
}

/// Pull the commit named by the target's sha256 hash from the configured
/// remote and deploy it. A target that is already deployed short-circuits.
pub fn install(sysroot: &str, target: &Target, creds: &Credentials) -> Result<InstallOutcome, Error> {
    let commit = match target.sha256() {
        Some(commit) => commit.clone(),
        None => return Ok(InstallOutcome::new(InstallCode::VALIDATION_FAILED, "".into(),
                                              "ostree target has no sha256 hash".into()))
    };
    if let Some((_, _, ref hashes)) = current_image() {
        if hashes.get("sha256") == Some(&commit) {
            return Ok(InstallOutcome::empty(InstallCode::ALREADY_PROCESSED));
        }
    }

    let mut pull = vec!["--repo".to_string(), format!("{}/ostree/repo", sysroot),
                       "pull".to_string(), "sota-remote".to_string()];
    if let Some(ref token) = creds.access_token {
        pull.push(format!("--http-header=Authorization=Bearer {}", token));
    }
    pull.push(commit.clone());
    run(&pull)?;

    let output = run(&["admin".to_string(), "deploy".to_string(),
                       format!("--sysroot={}", sysroot), commit])?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    Ok(InstallOutcome::new(InstallCode::OK, stdout, stderr))
}

/// The currently deployed image, from `ostree admin status`.
pub fn current_image() -> Option<(String, u64, HashMap<String, String>)> {
    let output = run(&["admin", "status"]).ok()?;
    let stdout = str::from_utf8(&output.stdout).ok()?;
    parse_current_commit(stdout).map(|(refname, commit)| {
        let mut hashes = HashMap::new();
        hashes.insert("sha256".to_string(), commit);
        (refname, 0, hashes)
    })
}

/// Extract the starred deployment from `ostree admin status` output.
fn parse_current_commit(stdout: &str) -> Option<(String, String)> {
    let lines = stdout.lines().map(str::trim).filter(|line| !line.is_empty()).collect::<Vec<_>>();
    for pair in lines.chunks(2) {
        if pair.len() != 2 {
            continue;
        }
        let head = pair[0].split(' ').collect::<Vec<_>>();
        if head.len() == 3 && head[0] == "*" {
            let commit = head[2].split('.').next().unwrap_or(head[2]);
            let refname = pair[1].split(' ').last().unwrap_or("").to_string();
            return Some((refname, commit.to_string()));
        }
    }
    None
}


#[cfg(test)]
mod tests {
    use super::*;


    const OSTREE_ADMIN_STATUS: &'static str = r#"
          gnome-ostree 67e382b11d213a402a5313e61cbc69dfd5ab93cb07.0
            origin refspec: gnome-ostree/buildmaster/x86_64-runtime
        * gnome-ostree ce19c41036cc45e49b0cecf6b157523c2105c4de1c.0
            origin refspec: osname:gnome-ostree/buildmaster/x86_64-runtime
        "#;

    #[test]
    fn parses_starred_deployment() {
        let (refname, commit) = parse_current_commit(OSTREE_ADMIN_STATUS).expect("current commit");
        assert_eq!(commit, "ce19c41036cc45e49b0cecf6b157523c2105c4de1c");
        assert_eq!(refname, "osname:gnome-ostree/buildmaster/x86_64-runtime");
    }

    #[test]
    fn no_starred_deployment() {
        assert!(parse_current_commit("gnome-ostree abc.0\n  origin refspec: x\n").is_none());
    }
}
