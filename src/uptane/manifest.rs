use serde_json as json;
use std::collections::HashMap;

use datatype::{EcuCustom, EcuManifests, EcuSerial, EcuVersion, Error, InstallCode,
               InstallResult, Key, PrivateKey, SignatureType, TufSigned,
               canonicalize_json};


/// Assembles and signs the vehicle version manifest: the primary's own report
/// plus the pre-signed reports collected from each secondary.
pub struct ManifestSigner {
    pub primary_ecu: EcuSerial,
    pub private_key: PrivateKey,
    pub sig_type:    SignatureType,
}

impl ManifestSigner {
    /// Sign one ECU version report with the primary's key.
    pub fn sign_report(&self, report: EcuVersion) -> Result<TufSigned, Error> {
        self.private_key.sign_data(json::to_value(report)?, self.sig_type)
    }

    /// Collect the inner reports into the manifest body. A secondary whose
    /// report doesn't verify under its registered key is logged and omitted.
    pub fn assemble(&self, primary_report: TufSigned,
                    secondary_reports: Vec<(EcuSerial, TufSigned, Option<Key>)>) -> EcuManifests {
        let mut manifests = HashMap::new();
        manifests.insert(self.primary_ecu.clone(), primary_report);

        for (serial, report, key) in secondary_reports {
            match key {
                Some(ref key) if verify_report(key, &report) => {
                    manifests.insert(serial, report);
                }
                Some(_) => error!("secondary {} version report failed verification, omitting", serial),
                None => error!("no public key registered for secondary {}, omitting", serial),
            }
        }

        EcuManifests {
            primary_ecu_serial:    self.primary_ecu.clone(),
            ecu_version_manifests: manifests,
        }
    }

    /// Sign the outer envelope for the `PUT {director}/manifest` call.
    pub fn sign_manifest(&self, manifests: EcuManifests) -> Result<TufSigned, Error> {
        self.private_key.sign_data(json::to_value(manifests)?, self.sig_type)
    }
}

/// Verify an inner version report against an ECU's registered public key.
pub fn verify_report(key: &Key, report: &TufSigned) -> bool {
    let checked = || -> Result<bool, Error> {
        let cjson = canonicalize_json(&json::to_vec(&report.signed)?)?;
        let material = key.raw_material()?;
        for sig in &report.signatures {
            let method: SignatureType = match sig.method.parse() {
                Ok(method) => method,
                Err(_) => continue
            };
            let raw = match method {
                SignatureType::Ed25519   => ::hex::decode(&sig.sig)?,
                SignatureType::RsaSsaPss => ::base64::decode(&sig.sig)?,
            };
            if method.verify_msg(&cjson, &material, &raw) {
                return Ok(true);
            }
        }
        Ok(false)
    };
    checked().unwrap_or_else(|err| { trace!("report verification failed: {}", err); false })
}

/// True iff any inner report carries an in-progress operation result, meaning
/// the previous installation hasn't settled yet.
pub fn has_pending_updates(manifests: &EcuManifests) -> bool {
    manifests.ecu_version_manifests.values().any(|report| {
        report.signed.get("custom")
            .and_then(|custom| custom.get("operation_result"))
            .and_then(|result| result.get("result_code"))
            .and_then(|code| code.as_u64())
            .map_or(false, |code| code == InstallCode::IN_PROGRESS as u64)
    })
}

/// The primary's version report from what the package manager says is
/// currently installed, with the most recent operation result attached.
pub fn primary_report(serial: EcuSerial, installed: Option<(String, u64, HashMap<String, String>)>,
                      last_result: Option<InstallResult>) -> EcuVersion {
    let custom = last_result.map(|result| EcuCustom { operation_result: result });
    match installed {
        Some((filepath, length, hashes)) => EcuVersion::from_target(serial, filepath, length, hashes, custom),
        None => EcuVersion::from_target(serial, "noimage".into(), 0, HashMap::new(), custom),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use uptane::test_meta::RootKeys;


    fn signer() -> (ManifestSigner, Key) {
        let keys = RootKeys::generate(1);
        let (priv_key, key) = keys.pairs[0].clone();
        let signer = ManifestSigner {
            primary_ecu: "primary-serial".parse().unwrap(),
            private_key: priv_key,
            sig_type:    SignatureType::Ed25519,
        };
        (signer, key)
    }

    fn secondary_report(serial: &str) -> (EcuSerial, TufSigned, Key) {
        let keys = RootKeys::generate(1);
        let (priv_key, key) = keys.pairs[0].clone();
        let version = primary_report(serial.parse().unwrap(), None, None);
        let signed = priv_key.sign_data(json::to_value(version).unwrap(), SignatureType::Ed25519).unwrap();
        (serial.parse().unwrap(), signed, key)
    }

    #[test]
    fn manifest_includes_verified_secondaries() {
        let (signer, _) = signer();
        let primary = signer.sign_report(primary_report(signer.primary_ecu.clone(), None, None)).unwrap();
        let (serial, report, key) = secondary_report("secondary-serial");
        let manifests = signer.assemble(primary, vec![(serial.clone(), report, Some(key))]);
        assert_eq!(manifests.ecu_version_manifests.len(), 2);
        assert!(manifests.ecu_version_manifests.contains_key(&serial));
    }

    #[test]
    fn manifest_omits_bad_signature() {
        let (signer, _) = signer();
        let primary = signer.sign_report(primary_report(signer.primary_ecu.clone(), None, None)).unwrap();
        let (serial, report, _) = secondary_report("secondary-serial");
        let (_, _, wrong_key) = secondary_report("other-serial");
        let manifests = signer.assemble(primary, vec![(serial, report, Some(wrong_key))]);
        assert_eq!(manifests.ecu_version_manifests.len(), 1);
        assert!(manifests.ecu_version_manifests.contains_key(&signer.primary_ecu));
    }

    #[test]
    fn outer_envelope_signed_by_primary() {
        let (signer, key) = signer();
        let primary = signer.sign_report(primary_report(signer.primary_ecu.clone(), None, None)).unwrap();
        let manifests = signer.assemble(primary, Vec::new());
        let envelope = signer.sign_manifest(manifests).unwrap();
        assert_eq!(envelope.signatures.len(), 1);
        assert!(verify_report(&key, &envelope));
        let body: EcuManifests = json::from_value(envelope.signed).unwrap();
        assert_eq!(body.primary_ecu_serial, signer.primary_ecu);
    }

    #[test]
    fn pending_updates_detected() {
        let (signer, _) = signer();
        let result = InstallResult::new("file.img".into(), InstallCode::IN_PROGRESS, "".into());
        let version = primary_report(signer.primary_ecu.clone(), None, Some(result));
        let primary = signer.sign_report(version).unwrap();
        let manifests = signer.assemble(primary, Vec::new());
        assert!(has_pending_updates(&manifests));

        let settled = primary_report(signer.primary_ecu.clone(), None,
                                     Some(InstallResult::new("file.img".into(), InstallCode::OK, "".into())));
        let primary = signer.sign_report(settled).unwrap();
        let manifests = signer.assemble(primary, Vec::new());
        assert!(!has_pending_updates(&manifests));
    }
}
