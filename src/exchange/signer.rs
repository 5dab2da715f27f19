//! Signing capability
//!
//! The engine only needs an address and a way to sign message bytes; key
//! material never leaves the signer.

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use std::path::Path;

use crate::error::{Error, Result};

/// Opaque signer
pub trait TradeSigner: Send + Sync {
    fn address(&self) -> Pubkey;
    fn sign_bytes(&self, message: &[u8]) -> Result<Signature>;
}

impl TradeSigner for Keypair {
    fn address(&self) -> Pubkey {
        self.pubkey()
    }

    fn sign_bytes(&self, message: &[u8]) -> Result<Signature> {
        self.try_sign_message(message)
            .map_err(|e| Error::Signing(e.to_string()))
    }
}

/// Load a keypair from a JSON byte-array or base58 file
pub fn load_keypair<P: AsRef<Path>>(path: P) -> Result<Keypair> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidKeypair(format!("{}: {}", path.display(), e)))?;
    let content = content.trim();

    let bytes: Vec<u8> = if content.starts_with('[') {
        serde_json::from_str(content)
            .map_err(|e| Error::InvalidKeypair(format!("bad JSON keypair: {}", e)))?
    } else {
        bs58::decode(content)
            .into_vec()
            .map_err(|e| Error::InvalidKeypair(format!("bad base58 keypair: {}", e)))?
    };

    Keypair::from_bytes(&bytes).map_err(|e| Error::InvalidKeypair(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_keypair_signs_verifiably() {
        let kp = Keypair::new();
        let sig = kp.sign_bytes(b"exit").unwrap();
        assert!(sig.verify(kp.address().as_ref(), b"exit"));
    }

    #[test]
    fn test_load_keypair_formats() {
        let kp = Keypair::new();

        let mut json = tempfile::NamedTempFile::new().unwrap();
        write!(json, "{}", serde_json::to_string(&kp.to_bytes().to_vec()).unwrap()).unwrap();
        assert_eq!(load_keypair(json.path()).unwrap().pubkey(), kp.pubkey());

        let mut b58 = tempfile::NamedTempFile::new().unwrap();
        write!(b58, "{}\n", kp.to_base58_string()).unwrap();
        assert_eq!(load_keypair(b58.path()).unwrap().pubkey(), kp.pubkey());
    }
}
