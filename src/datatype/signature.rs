use base64;
use crypto::ed25519;
use hex;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::{Padding, Rsa};
use openssl::sign::Verifier as OpensslVerifier;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{RsaKeyPair, RSA_PSS_SHA256};
use serde::{Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use datatype::Error;


/// A signature over the canonical form of a role document or version report.
///
/// The method is kept as the raw wire string so that a document carrying an
/// unknown method still parses and can be rejected during verification.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct Signature {
    pub keyid:  String,
    pub method: String,
    pub sig:    String,
}


#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum SignatureType {
    Ed25519,
    RsaSsaPss,
}

impl FromStr for SignatureType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(SignatureType::Ed25519),
            "rsassa-pss" | "rsassa-pss-sha256" => Ok(SignatureType::RsaSsaPss),
            _ => Err(Error::TufSigType(s.to_string()))
        }
    }
}

impl Display for SignatureType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            SignatureType::Ed25519   => write!(f, "ed25519"),
            SignatureType::RsaSsaPss => write!(f, "rsassa-pss-sha256"),
        }
    }
}

impl Serialize for SignatureType {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format!("{}", self))
    }
}

impl SignatureType {
    /// Sign a message, returning the raw signature bytes.
    pub fn sign_msg(&self, msg: &[u8], der_key: &[u8]) -> Result<Vec<u8>, Error> {
        match *self {
            SignatureType::Ed25519 => Ok(ed25519::signature(msg, der_key).as_ref().into()),

            SignatureType::RsaSsaPss => {
                let pair = RsaKeyPair::from_der(der_key)
                    .map_err(|err| Error::KeySign(format!("couldn't parse RSA key: {}", err)))?;
                let mut sig = vec![0; pair.public_modulus_len()];
                pair.sign(&RSA_PSS_SHA256, &SystemRandom::new(), msg, &mut sig)
                    .map_err(|err| Error::KeySign(format!("couldn't sign with RSA key: {}", err)))?;
                Ok(sig)
            }
        }
    }

    /// Encode the raw signature bytes the way this method writes them on the wire.
    pub fn encode_sig(&self, sig: &[u8]) -> String {
        match *self {
            SignatureType::Ed25519   => hex::encode(sig),
            SignatureType::RsaSsaPss => base64::encode(sig),
        }
    }

    /// Verify a message against a signature, where the key material is in its
    /// wire encoding: hex for Ed25519, PEM (SPKI) for RSA.
    pub fn verify_msg(&self, msg: &[u8], der_key: &[u8], sig: &[u8]) -> bool {
        match *self {
            SignatureType::Ed25519 => ed25519::verify(msg, der_key, sig),

            SignatureType::RsaSsaPss => {
                let verify = || -> Result<bool, Error> {
                    let pub_key = PKey::from_rsa(Rsa::public_key_from_der(der_key)?)?;
                    let mut verifier = OpensslVerifier::new(MessageDigest::sha256(), &pub_key)?;
                    verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
                    verifier.update(msg)?;
                    Ok(verifier.verify(sig)?)
                };
                verify().unwrap_or_else(|err| { trace!("RSA SSA-PSS verification failed: {}", err); false })
            }
        }
    }
}


/// Witness that the process-wide crypto state was set up exactly once. The
/// orchestrator carries this by value so nothing signs before initialisation.
pub struct CryptoToken(());

impl CryptoToken {
    pub fn init() -> Result<CryptoToken, Error> {
        ::openssl::init();
        let mut probe = [0u8; 8];
        SystemRandom::new().fill(&mut probe)
            .map_err(|_| Error::KeySign("system RNG unavailable".into()))?;
        Ok(CryptoToken(()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use openssl::rsa::Rsa;
    use pem;
    use ring::rand::{SecureRandom, SystemRandom};


    fn flip_bit(mut data: Vec<u8>) -> Vec<u8> { data[0] ^= 1; data }

    fn sign_and_verify(sig_type: SignatureType, priv_key: &[u8], pub_key: &[u8]) {
        let msg = b"hello";
        let sig = sig_type.sign_msg(msg, priv_key).expect("sign_msg");
        let bad_msg = flip_bit(msg.as_ref().into());
        let bad_sig = flip_bit(sig.clone());

        assert!(sig_type.verify_msg(msg, pub_key, &sig));
        assert!(!sig_type.verify_msg(&bad_msg, pub_key, &sig));
        assert!(!sig_type.verify_msg(msg, pub_key, &bad_sig));
    }

    #[test]
    fn test_rsa_sign_and_verify() {
        let rsa = Rsa::generate(2048).expect("generate rsa");
        let priv_der = rsa.private_key_to_der().expect("private der");
        let pub_pem = rsa.public_key_to_pem().expect("public pem");
        let pub_der = pem::parse(pub_pem).expect("pem").contents;
        sign_and_verify(SignatureType::RsaSsaPss, &priv_der, &pub_der);
    }

    #[test]
    fn test_ed25519_sign_and_verify() {
        let mut seed = [0u8; 32];
        SystemRandom::new().fill(&mut seed).expect("seed");
        let (priv_key, pub_key) = ::crypto::ed25519::keypair(&seed);
        sign_and_verify(SignatureType::Ed25519, &priv_key, &pub_key);
    }

    #[test]
    fn test_unknown_sig_type() {
        assert!("badsignature".parse::<SignatureType>().is_err());
        assert_eq!("rsassa-pss".parse::<SignatureType>().unwrap(), SignatureType::RsaSsaPss);
        assert_eq!("rsassa-pss-sha256".parse::<SignatureType>().unwrap(), SignatureType::RsaSsaPss);
        assert_eq!("ed25519".parse::<SignatureType>().unwrap(), SignatureType::Ed25519);
    }
}
