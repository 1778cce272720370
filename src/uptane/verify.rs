use serde_json as json;
use std::collections::{HashMap, HashSet};

use datatype::{Error, Key, RoleMeta, RoleName, Signature, SignatureType, TufSigned,
               canonicalize_json};


/// Holds the authorised keys and per-role thresholds of one Root document and
/// answers whether a signed document meets its role's threshold.
#[derive(Default, Debug, Clone)]
pub struct Verifier {
    keys:  HashMap<String, Key>,
    roles: HashMap<RoleName, RoleMeta>,
}

impl Verifier {
    /// Build a verifier from the `keys` and `roles` listings of a Root body.
    pub fn from_root(keys: &HashMap<String, Key>, roles: &HashMap<RoleName, RoleMeta>) -> Result<Verifier, Error> {
        let mut verifier = Verifier::default();
        for (role, meta) in roles {
            verifier.add_meta(*role, meta.clone())?;
        }
        for (id, key) in keys {
            verifier.add_key(id.clone(), key.clone())?;
        }
        Ok(verifier)
    }

    pub fn add_meta(&mut self, role: RoleName, meta: RoleMeta) -> Result<(), Error> {
        trace!("adding role to verifier: {}", role);
        if self.roles.get(&role).is_some() {
            Err(Error::TufRole(format!("{} already exists", role)))
        } else if meta.threshold < 1 {
            Err(Error::IllegalThreshold(format!("{} threshold is {}", role, meta.threshold)))
        } else if (meta.threshold as usize) > meta.keyids.len() {
            Err(Error::IllegalThreshold(format!("{} threshold {} above {} listed keys",
                                                role, meta.threshold, meta.keyids.len())))
        } else {
            self.roles.insert(role, meta);
            Ok(())
        }
    }

    pub fn add_key(&mut self, id: String, key: Key) -> Result<(), Error> {
        trace!("adding key_id to verifier: {}", id);
        if id != key.key_id()? {
            Err(Error::KeyId(format!("wrong key_id: {}", id)))
        } else if self.keys.get(&id).is_some() {
            Err(Error::KeyId(format!("key_id already exists: {}", id)))
        } else {
            self.keys.insert(id, key);
            Ok(())
        }
    }

    /// Verify that a role-defined threshold of distinct signatures validate.
    ///
    /// A signature with an unknown method fails the whole document; unknown
    /// key ids merely don't count towards the threshold.
    pub fn verify_signed(&self, role: RoleName, signed: &TufSigned) -> Result<(), Error> {
        let meta = self.roles.get(&role).ok_or_else(|| Error::TufRole(format!("{} not found", role)))?;
        let cjson = canonicalize_json(&json::to_vec(&signed.signed)?)?;

        let mut valid = HashSet::new();
        for sig in &signed.signatures {
            let method = sig.method.parse::<SignatureType>()
                .map_err(|_| Error::BadSignatures(format!("unknown method `{}` for key {}", sig.method, sig.keyid)))?;
            if ! meta.keyids.contains(&sig.keyid) {
                trace!("key {} not authorised for role {}", sig.keyid, role);
                continue;
            }
            if self.verify_data(&cjson, method, sig) {
                valid.insert(&sig.sig);
            }
        }

        if (valid.len() as i64) < meta.threshold {
            Err(Error::UnmetThreshold(format!("{}: {} of {} ok", role, valid.len(), meta.threshold)))
        } else {
            Ok(())
        }
    }

    /// Verify that the signature matches the data under a known key.
    fn verify_data(&self, data: &[u8], method: SignatureType, sig: &Signature) -> bool {
        let verify = || -> Result<bool, Error> {
            let key = self.keys.get(&sig.keyid).ok_or_else(|| Error::KeyNotFound(sig.keyid.clone()))?;
            let material = key.raw_material()?;
            let raw = match method {
                SignatureType::Ed25519   => ::hex::decode(&sig.sig)?,
                SignatureType::RsaSsaPss => ::base64::decode(&sig.sig)?,
            };
            Ok(method.verify_msg(data, &material, &raw))
        };

        match verify() {
            Ok(true)  => { trace!("successful verification: {}", sig.keyid); true }
            Ok(false) => { trace!("failed verification: {}", sig.keyid); false }
            Err(err)  => { trace!("failed verification for {}: {}", sig.keyid, err); false }
        }
    }
}
