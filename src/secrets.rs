//! External collaborator boundary for credential decryption.
//!
//! Credential decryption itself is explicitly out of scope; adapters only
//! ever see a `SecretStore` trait object and call `decrypt`.

use async_trait::async_trait;

use crate::config::Ciphertext;
use crate::error::AnchorError;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn decrypt(&self, tenant_id: &str, ciphertext: &Ciphertext) -> Result<String, AnchorError>;
}

/// A `SecretStore` that treats ciphertext as already-plaintext UTF-8. Useful
/// for tests and for embedding this crate in a process that has already
/// resolved secrets upstream.
pub struct PlaintextSecretStore;

#[async_trait]
impl SecretStore for PlaintextSecretStore {
    async fn decrypt(&self, _tenant_id: &str, ciphertext: &Ciphertext) -> Result<String, AnchorError> {
        String::from_utf8(ciphertext.0.clone())
            .map_err(|e| AnchorError::backend("secrets", "decrypt", e))
    }
}
