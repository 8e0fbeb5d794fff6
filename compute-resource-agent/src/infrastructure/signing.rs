use anyhow::Context;
use ed25519_dalek::{Signer, SigningKey};
use serde::Serialize;

pub const COMPUTE_RESOURCE_ID_HEADER: &str = "compute-resource-id";
pub const COMPUTE_RESOURCE_PAYLOAD_HEADER: &str = "compute-resource-payload";
pub const COMPUTE_RESOURCE_SIGNATURE_HEADER: &str = "compute-resource-signature";
pub const JOB_PRIVATE_KEY_HEADER: &str = "job-private-key";

#[derive(Serialize)]
struct RequestPayload<'a> {
    r#type: &'a str,
    timestamp: i64,
    path: &'a str,
}

/// Headers of one signed compute-resource request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedHeaders {
    pub compute_resource_id: String,
    pub payload: String,
    pub signature: String,
}

impl SignedHeaders {
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            (COMPUTE_RESOURCE_ID_HEADER, self.compute_resource_id.as_str()),
            (COMPUTE_RESOURCE_PAYLOAD_HEADER, self.payload.as_str()),
            (COMPUTE_RESOURCE_SIGNATURE_HEADER, self.signature.as_str()),
        ]
    }
}

/// The compute resource's Ed25519 identity.
pub struct ComputeResourceIdentity {
    id: String,
    signing_key: SigningKey,
}

impl std::fmt::Debug for ComputeResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeResourceIdentity")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl ComputeResourceIdentity {
    pub fn from_hex(id: impl Into<String>, private_key: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(private_key.trim()).context("Private key is not valid hex")?;
        let seed: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            anyhow::anyhow!("Private key has {} bytes, expected 32", bytes.len())
        })?;
        Ok(Self {
            id: id.into(),
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// A fresh key pair whose id is the hex public key.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self {
            id: hex::encode(signing_key.verifying_key().as_bytes()),
            signing_key,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Sign `{type, timestamp, path}` for a request to `path`.
    pub fn sign_request(
        &self,
        request_type: &str,
        path: &str,
        timestamp: i64,
    ) -> anyhow::Result<SignedHeaders> {
        let payload = serde_json::to_string(&RequestPayload {
            r#type: request_type,
            timestamp,
            path,
        })?;
        let signature = self.signing_key.sign(payload.as_bytes());
        Ok(SignedHeaders {
            compute_resource_id: self.id.clone(),
            payload,
            signature: hex::encode(signature.to_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    use super::*;

    #[test]
    fn test_signature_verifies_against_public_key() {
        let identity = ComputeResourceIdentity::generate();
        let headers = identity
            .sign_request("GET", "/api/compute_resource/compute_resources/x/apps", 1_700_000_000)
            .unwrap();
        assert_eq!(
            headers.payload,
            r#"{"type":"GET","timestamp":1700000000,"path":"/api/compute_resource/compute_resources/x/apps"}"#
        );

        let public: [u8; 32] = hex::decode(identity.public_key_hex()).unwrap().try_into().unwrap();
        let verifying_key = VerifyingKey::from_bytes(&public).unwrap();
        let signature: [u8; 64] = hex::decode(&headers.signature).unwrap().try_into().unwrap();
        verifying_key
            .verify(headers.payload.as_bytes(), &Signature::from_bytes(&signature))
            .unwrap();
    }

    #[test]
    fn test_round_trip_through_hex() {
        let identity = ComputeResourceIdentity::generate();
        let restored =
            ComputeResourceIdentity::from_hex(identity.id(), &identity.private_key_hex()).unwrap();
        assert_eq!(restored.public_key_hex(), identity.public_key_hex());
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(ComputeResourceIdentity::from_hex("id", "zz").is_err());
        assert!(ComputeResourceIdentity::from_hex("id", "abcd").is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let identity = ComputeResourceIdentity::generate();
        assert!(!format!("{identity:?}").contains(&identity.private_key_hex()));
    }
}
