//! # Key Files
//!
//! One JSON file per owner under `<data_dir>/keys/`, holding the owner's
//! Ed25519 signing key and X25519 delivery key as hex. Files are created
//! with mode 0600 on Unix.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use relic_protocol::crypto::keys::{RelicKeypair, RelicPublicKey};
use relic_protocol::crypto::sealing::{DeliveryKeypair, DeliveryPublicKey};

#[derive(Serialize, Deserialize)]
struct KeyFile {
    owner: String,
    signing_key: String,
    delivery_key: String,
    public_key: String,
    delivery_public_key: String,
    created_at: DateTime<Utc>,
}

/// An owner's loaded keys.
pub struct Identity {
    pub owner: String,
    pub signing: RelicKeypair,
    pub delivery: DeliveryKeypair,
}

/// Public half of an [`Identity`], safe to print.
#[derive(Debug, Serialize)]
pub struct PublicCard {
    pub owner: String,
    pub public_key: RelicPublicKey,
    pub delivery_public_key: String,
}

impl Identity {
    pub fn card(&self) -> PublicCard {
        PublicCard {
            owner: self.owner.clone(),
            public_key: self.signing.public_key(),
            delivery_public_key: self.delivery.public_key().to_hex(),
        }
    }

    pub fn delivery_public_key(&self) -> DeliveryPublicKey {
        self.delivery.public_key()
    }
}

pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("keys"),
        }
    }

    fn path_for(&self, owner: &str) -> Result<PathBuf> {
        let valid = !owner.is_empty()
            && owner
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !owner.starts_with('.');
        if !valid {
            bail!("owner id {:?} is not usable as a key file name", owner);
        }
        Ok(self.dir.join(format!("{}.json", owner)))
    }

    pub fn exists(&self, owner: &str) -> bool {
        self.path_for(owner).map(|p| p.exists()).unwrap_or(false)
    }

    /// Generate and persist keys for `owner`. Refuses to overwrite.
    pub fn create(&self, owner: &str) -> Result<Identity> {
        let path = self.path_for(owner)?;
        if path.exists() {
            bail!("keys for {} already exist at {}", owner, path.display());
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create key directory {}", self.dir.display()))?;

        let identity = Identity {
            owner: owner.to_string(),
            signing: RelicKeypair::generate(),
            delivery: DeliveryKeypair::generate(),
        };
        let file = KeyFile {
            owner: owner.to_string(),
            signing_key: identity.signing.to_hex(),
            delivery_key: identity.delivery.to_hex(),
            public_key: identity.signing.public_key().to_hex(),
            delivery_public_key: identity.delivery.public_key().to_hex(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write key file {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to restrict {}", path.display()))?;
        }

        tracing::info!(owner = %owner, path = %path.display(), "keys generated");
        Ok(identity)
    }

    pub fn load(&self, owner: &str) -> Result<Identity> {
        let path = self.path_for(owner)?;
        let bytes = std::fs::read(&path).with_context(|| {
            format!("no keys for {} (expected {}); run `relic keygen {}`", owner, path.display(), owner)
        })?;
        let file: KeyFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("malformed key file {}", path.display()))?;
        if file.owner != owner {
            bail!("key file {} belongs to {}", path.display(), file.owner);
        }
        Ok(Identity {
            owner: file.owner,
            signing: RelicKeypair::from_hex(&file.signing_key)
                .with_context(|| format!("bad signing key in {}", path.display()))?,
            delivery: DeliveryKeypair::from_hex(&file.delivery_key)
                .with_context(|| format!("bad delivery key in {}", path.display()))?,
        })
    }

    pub fn load_or_create(&self, owner: &str) -> Result<Identity> {
        if self.exists(owner) {
            self.load(owner)
        } else {
            self.create(owner)
        }
    }
}
