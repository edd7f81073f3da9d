// src/layout/signing.rs

//! Package signing
//!
//! The manifest is the signed artifact: an Ed25519 signature over the raw
//! bytes of `zarf.yaml` is stored base64-encoded in `zarf.yaml.sig`. Because
//! `checksums.txt` covers every other file and the manifest records the
//! package SHA chain, signing the manifest transitively covers the package.
//! Keys live in small TOML files.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Error;
use crate::layout::PackagePaths;

/// Key file format shared by private and public halves
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    algorithm: String,
    key: String,
    #[serde(default)]
    key_id: Option<String>,
}

/// A signing key pair for packages
pub struct SigningKeyPair {
    signing_key: SigningKey,
    key_id: Option<String>,
}

impl SigningKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            key_id: None,
        }
    }

    pub fn with_key_id(mut self, id: &str) -> Self {
        self.key_id = Some(id.to_string());
        self
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Save the pair to private and public key files.
    pub fn save_to_files(&self, private_path: &Path, public_path: &Path) -> Result<()> {
        let private = KeyFile {
            algorithm: "ed25519".to_string(),
            key: BASE64.encode(self.signing_key.to_bytes()),
            key_id: self.key_id.clone(),
        };
        fs::write(private_path, toml::to_string_pretty(&private)?)
            .with_context(|| format!("Failed to write private key: {}", private_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(private_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(private_path, perms)?;
        }

        let public = KeyFile {
            algorithm: "ed25519".to_string(),
            key: BASE64.encode(self.verifying_key().as_bytes()),
            key_id: self.key_id.clone(),
        };
        fs::write(public_path, toml::to_string_pretty(&public)?)
            .with_context(|| format!("Failed to write public key: {}", public_path.display()))?;
        Ok(())
    }

    /// Load a pair from a private key file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let key_file = read_key_file(path)?;
        let key_bytes: [u8; 32] = BASE64
            .decode(&key_file.key)
            .context("Invalid base64 in key file")?
            .try_into()
            .map_err(|_| anyhow::anyhow!("Invalid private key length"))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_bytes),
            key_id: key_file.key_id,
        })
    }
}

fn read_key_file(path: &Path) -> Result<KeyFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file: {}", path.display()))?;
    let key_file: KeyFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse key file: {}", path.display()))?;
    if key_file.algorithm != "ed25519" {
        anyhow::bail!("Unsupported key algorithm: {}", key_file.algorithm);
    }
    Ok(key_file)
}

fn load_verifying_key(path: &Path) -> Result<VerifyingKey> {
    let key_file = read_key_file(path)?;
    let key_bytes: [u8; 32] = BASE64
        .decode(&key_file.key)
        .context("Invalid base64 in public key file")?
        .try_into()
        .map_err(|_| anyhow::anyhow!("Invalid public key length"))?;
    VerifyingKey::from_bytes(&key_bytes).context("Invalid public key")
}

/// Sign the layout's manifest, writing `zarf.yaml.sig`.
pub fn sign_package(paths: &PackagePaths, private_key_path: &Path) -> Result<()> {
    let pair = SigningKeyPair::load_from_file(private_key_path)?;
    let manifest = fs::read(paths.zarf_yaml())
        .with_context(|| format!("Failed to read {}", paths.zarf_yaml().display()))?;
    let signature = pair.signing_key.sign(&manifest);
    fs::write(paths.signature(), BASE64.encode(signature.to_bytes()))
        .with_context(|| format!("Failed to write {}", paths.signature().display()))?;
    Ok(())
}

/// Verify `zarf.yaml.sig` against the manifest with the given public key.
pub fn verify_package(paths: &PackagePaths, public_key_path: &Path) -> Result<()> {
    let verifying_key = load_verifying_key(public_key_path)?;
    let manifest = fs::read(paths.zarf_yaml())
        .with_context(|| format!("Failed to read {}", paths.zarf_yaml().display()))?;
    let sig_b64 = fs::read_to_string(paths.signature())
        .map_err(|_| Error::integrity("package signature file is missing"))?;
    let sig_bytes: [u8; 64] = BASE64
        .decode(sig_b64.trim())
        .map_err(|_| Error::integrity("package signature is not valid base64"))?
        .try_into()
        .map_err(|_| Error::integrity("package signature has the wrong length"))?;
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(&manifest, &signature)
        .map_err(|_| Error::integrity("package signature does not match the manifest"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_layout() -> (tempfile::TempDir, PackagePaths, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let paths = PackagePaths::new(dir.path().join("pkg"));
        std::fs::create_dir_all(paths.base()).unwrap();
        std::fs::write(paths.zarf_yaml(), "kind: ZarfPackageConfig\n").unwrap();

        let private = dir.path().join("cosign.key");
        let public = dir.path().join("cosign.pub");
        SigningKeyPair::generate()
            .with_key_id("test")
            .save_to_files(&private, &public)
            .unwrap();
        sign_package(&paths, &private).unwrap();
        (dir, paths, public)
    }

    #[test]
    fn test_sign_and_verify() {
        let (_dir, paths, public) = signed_layout();
        assert!(paths.signature().exists());
        verify_package(&paths, &public).unwrap();
    }

    #[test]
    fn test_verify_rejects_modified_manifest() {
        let (_dir, paths, public) = signed_layout();
        std::fs::write(paths.zarf_yaml(), "kind: ZarfInitConfig\n").unwrap();
        let err = verify_package(&paths, &public).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let (dir, paths, _public) = signed_layout();
        let other_private = dir.path().join("other.key");
        let other_public = dir.path().join("other.pub");
        SigningKeyPair::generate()
            .save_to_files(&other_private, &other_public)
            .unwrap();
        assert!(verify_package(&paths, &other_public).is_err());
    }

    #[test]
    fn test_key_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let private = dir.path().join("k.key");
        let public = dir.path().join("k.pub");
        let pair = SigningKeyPair::generate().with_key_id("ci");
        pair.save_to_files(&private, &public).unwrap();

        let loaded = SigningKeyPair::load_from_file(&private).unwrap();
        assert_eq!(
            loaded.verifying_key().as_bytes(),
            pair.verifying_key().as_bytes()
        );
        assert_eq!(loaded.key_id.as_deref(), Some("ci"));
    }
}
