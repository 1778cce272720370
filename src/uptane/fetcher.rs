use crypto::digest::Digest;
use crypto::sha2::{Sha256, Sha512};

use datatype::{Error, RepoName, RoleName, Target, UptaneConfig, Url};
use http::Client;
use storage::Storage;


const CHUNK_SIZE: usize = 64 * 1024;


/// Per-role caps on downloaded metadata, preventing endless-data attacks.
#[derive(Debug, Clone)]
pub struct DownloadLimits {
    pub root:      u64,
    pub timestamp: u64,
    pub other:     u64,
}

impl Default for DownloadLimits {
    fn default() -> Self {
        DownloadLimits {
            root:      64 * 1024,
            timestamp: 16 * 1024,
            other:     8 * 1024 * 1024,
        }
    }
}

impl DownloadLimits {
    pub fn for_role(&self, role: RoleName) -> u64 {
        match role {
            RoleName::Root      => self.root,
            RoleName::Timestamp => self.timestamp,
            RoleName::Targets | RoleName::Snapshot => self.other,
        }
    }
}


/// Retrieves role documents and target images from the two repositories,
/// enforcing size caps and validating image hashes during the download.
pub struct Fetcher {
    pub director_server: Url,
    pub repo_server:     Url,
    pub limits:          DownloadLimits,
}

impl Fetcher {
    pub fn new(config: &UptaneConfig) -> Fetcher {
        Fetcher {
            director_server: config.director_server.clone(),
            repo_server:     config.repo_server.clone(),
            limits: DownloadLimits {
                root:      config.max_root_size,
                timestamp: config.max_timestamp_size,
                other:     config.max_meta_size,
            },
        }
    }

    fn server(&self, repo: RepoName) -> &Url {
        match repo {
            RepoName::Director => &self.director_server,
            RepoName::Images   => &self.repo_server,
        }
    }

    /// Fetch a role document, the latest version or a specific one.
    pub fn fetch_role(&self, client: &Client, repo: RepoName, role: RoleName, version: Option<u64>)
                      -> Result<Vec<u8>, Error> {
        let name = match version {
            Some(version) => format!("{}.{}", version, role.filename()),
            None => role.filename(),
        };
        trace!("fetching {} from {} repo", name, repo);
        let rx = client.get(self.server(repo).join(&name), None);
        let body = rx.recv().ok_or_else(|| Error::Client("no response to role fetch".into()))?.body()?;
        let cap = self.limits.for_role(role);
        if body.len() as u64 > cap {
            return Err(Error::TooLarge(format!("{} is {} bytes, cap is {}", name, body.len(), cap)));
        }
        Ok(body)
    }

    /// Stream a target image into storage, hashing as it goes. The file is
    /// only committed when the byte count and a listed hash both agree;
    /// anything else is discarded without becoming visible.
    pub fn fetch_verify_target(&self, client: &Client, storage: &mut Storage, target: &Target,
                               from_director: bool) -> Result<(), Error> {
        debug!("downloading target {}", target);
        let rx = client.get(self.repo_server.join(&format!("targets/{}", target.filename)), None);
        let body = rx.recv().ok_or_else(|| Error::Client("no response to target fetch".into()))?.body()?;

        let mut writer = storage.allocate_target_file(from_director, &target.filename, target.length)?;
        let mut sha256 = Sha256::new();
        let mut sha512 = Sha512::new();
        let mut received = 0u64;

        for chunk in body.chunks(CHUNK_SIZE) {
            received += chunk.len() as u64;
            if received > target.length {
                let _ = writer.abort();
                return Err(Error::TooLarge(format!("{}: stream exceeds declared length {}",
                                                   target.filename, target.length)));
            }
            sha256.input(chunk);
            sha512.input(chunk);
            writer.write_chunk(chunk)?;
        }

        if received != target.length {
            let _ = writer.abort();
            return Err(Error::ValidationFailed(format!("{}: stream closed at {} of {} bytes",
                                                       target.filename, received, target.length)));
        }

        let matched = target.hashes.iter().any(|(algo, digest)| match algo.as_str() {
            "sha256" => digest == &sha256.result_str(),
            "sha512" => digest == &sha512.result_str(),
            _ => false
        });
        if ! matched {
            let _ = writer.abort();
            return Err(Error::ValidationFailed(format!("{}: no listed hash matches the download",
                                                       target.filename)));
        }
        writer.commit()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Read;
    use tempfile::tempdir;

    use datatype::UptaneConfig;
    use http::TestClient;
    use storage::FsStorage;
    use uptane::test_meta::sha256_hex;


    fn fetcher() -> Fetcher {
        Fetcher::new(&UptaneConfig::default())
    }

    fn target_for(data: &[u8], length: u64) -> Target {
        Target {
            filename: "image.bin".into(),
            length:   length,
            hashes:   hashmap!{"sha256".to_string() => sha256_hex(data)},
            custom:   None,
        }
    }

    #[test]
    fn role_fetch_hits_versioned_path() {
        let client = TestClient::routed(HashMap::new());
        client.set_route("/director/2.root.json", b"root-v2".to_vec());
        let bytes = fetcher().fetch_role(&client, RepoName::Director, RoleName::Root, Some(2)).unwrap();
        assert_eq!(&bytes, b"root-v2");
        assert!(fetcher().fetch_role(&client, RepoName::Director, RoleName::Targets, None).is_err());
    }

    #[test]
    fn oversized_role_rejected() {
        let client = TestClient::routed(HashMap::new());
        client.set_route("/repo/timestamp.json", vec![b'x'; 17 * 1024]);
        match fetcher().fetch_role(&client, RepoName::Images, RoleName::Timestamp, None) {
            Err(Error::TooLarge(_)) => (),
            other => panic!("expected TooLarge, got {:?}", other.map(|b| b.len()))
        }
    }

    #[test]
    fn target_download_commits_on_matching_hash() {
        let dir = tempdir().unwrap();
        let mut storage = FsStorage::new(dir.path()).unwrap();
        let data = b"firmware-image-bytes".to_vec();
        let client = TestClient::routed(HashMap::new());
        client.set_route("/repo/targets/image.bin", data.clone());

        fetcher().fetch_verify_target(&client, &mut storage, &target_for(&data, data.len() as u64), true).unwrap();
        let mut buf = Vec::new();
        storage.open_target_file("image.bin").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn overlong_stream_discarded() {
        let dir = tempdir().unwrap();
        let mut storage = FsStorage::new(dir.path()).unwrap();
        let data = b"firmware-image-bytes".to_vec();
        let client = TestClient::routed(HashMap::new());
        client.set_route("/repo/targets/image.bin", data.clone());

        let short = target_for(&data, data.len() as u64 - 1);
        assert!(fetcher().fetch_verify_target(&client, &mut storage, &short, true).is_err());
        assert!(storage.open_target_file("image.bin").is_err());
    }

    #[test]
    fn wrong_hash_discarded() {
        let dir = tempdir().unwrap();
        let mut storage = FsStorage::new(dir.path()).unwrap();
        let data = b"firmware-image-bytes".to_vec();
        let client = TestClient::routed(HashMap::new());
        client.set_route("/repo/targets/image.bin", data.clone());

        let mut target = target_for(&data, data.len() as u64);
        target.hashes.insert("sha256".into(), "00".into());
        match fetcher().fetch_verify_target(&client, &mut storage, &target, true) {
            Err(Error::ValidationFailed(_)) => (),
            other => panic!("expected ValidationFailed, got {:?}", other)
        }
        assert!(storage.open_target_file("image.bin").is_err());
    }
}
