//! Ed25519 authorization check for payment payloads.
//!
//! The gateway stores no keys: the payer's public key travels inside the
//! payload and the signature binds every field that reaches the ledger.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use super::error::PaymentError;
use super::types::PaymentPayload;

/// Verify an Ed25519 signature.
///
/// Returns `true` if the signature is valid, `false` otherwise.
pub fn verify_ed25519(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let pk_bytes: [u8; 32] = match public_key.try_into() {
        Ok(b) => b,
        Err(_) => return false,
    };

    let sig_bytes: [u8; 64] = match signature.try_into() {
        Ok(b) => b,
        Err(_) => return false,
    };

    let verifying_key = match VerifyingKey::from_bytes(&pk_bytes) {
        Ok(k) => k,
        Err(_) => return false,
    };

    let sig = Signature::from_bytes(&sig_bytes);

    verifying_key.verify(message, &sig).is_ok()
}

/// Check the payload's authorization signature locally, before any
/// facilitator round-trip is spent on it.
pub fn verify_authorization(payload: &PaymentPayload) -> Result<(), PaymentError> {
    let public_key = hex::decode(&payload.public_key)
        .map_err(|_| PaymentError::MalformedPayment("public key is not hex".to_string()))?;

    let signature = BASE64
        .decode(&payload.signature)
        .map_err(|_| PaymentError::MalformedPayment("signature is not base64".to_string()))?;

    if signature.len() != 64 {
        return Err(PaymentError::MalformedPayment(format!(
            "expected 64-byte signature, got {}",
            signature.len()
        )));
    }

    if verify_ed25519(&public_key, &payload.signing_message(), &signature) {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature)
    }
}

/// Generate a new Ed25519 keypair for testing.
///
/// Returns (private_key_bytes, public_key_bytes).
#[cfg(test)]
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();

    let mut private_key = [0u8; 32];
    private_key.copy_from_slice(signing_key.as_bytes());

    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(verifying_key.as_bytes());

    (private_key, public_key)
}

/// Sign a message with a private key (for testing).
#[cfg(test)]
pub fn sign_message(private_key: &[u8; 32], message: &[u8]) -> [u8; 64] {
    use ed25519_dalek::{Signer, SigningKey};

    let signing_key = SigningKey::from_bytes(private_key);
    let signature = signing_key.sign(message);
    signature.to_bytes()
}

/// Build a correctly signed payload for tests.
#[cfg(test)]
pub fn signed_test_payload(
    nonce: &str,
    amount: i64,
    network: &str,
    receiver: &str,
) -> PaymentPayload {
    let (private_key, public_key) = generate_keypair();
    let mut payload = PaymentPayload {
        payer: "0xpayer".to_string(),
        receiver: receiver.to_string(),
        amount: amount.to_string(),
        network: network.to_string(),
        nonce: nonce.to_string(),
        public_key: hex::encode(public_key),
        signature: String::new(),
    };
    let sig = sign_message(&private_key, &payload.signing_message());
    payload.signature = BASE64.encode(sig);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_valid_signature() {
        let (private_key, public_key) = generate_keypair();
        let message = b"pay 1000 micro-USDC";
        let signature = sign_message(&private_key, message);

        assert!(verify_ed25519(&public_key, message, &signature));
    }

    #[test]
    fn test_verify_wrong_message() {
        let (private_key, public_key) = generate_keypair();
        let signature = sign_message(&private_key, b"original");

        assert!(!verify_ed25519(&public_key, b"tampered", &signature));
    }

    #[test]
    fn test_verify_wrong_key() {
        let (private_key, _) = generate_keypair();
        let (_, other_public_key) = generate_keypair();
        let message = b"pay 1000 micro-USDC";
        let signature = sign_message(&private_key, message);

        assert!(!verify_ed25519(&other_public_key, message, &signature));
    }

    #[test]
    fn test_invalid_lengths() {
        let (_, public_key) = generate_keypair();
        assert!(!verify_ed25519(&[0u8; 16], b"m", &[0u8; 64]));
        assert!(!verify_ed25519(&public_key, b"m", &[0u8; 32]));
    }

    #[test]
    fn test_authorization_accepts_signed_payload() {
        let payload = signed_test_payload("nonce-1", 1000, "base-sepolia", "0xrecv");
        assert!(verify_authorization(&payload).is_ok());
    }

    #[test]
    fn test_authorization_rejects_tampered_amount() {
        let mut payload = signed_test_payload("nonce-1", 1000, "base-sepolia", "0xrecv");
        payload.amount = "1".to_string();
        assert!(matches!(
            verify_authorization(&payload),
            Err(PaymentError::InvalidSignature)
        ));
    }

    #[test]
    fn test_authorization_rejects_bad_encodings() {
        let mut payload = signed_test_payload("nonce-1", 1000, "base-sepolia", "0xrecv");
        payload.public_key = "zz".to_string();
        assert!(matches!(
            verify_authorization(&payload),
            Err(PaymentError::MalformedPayment(_))
        ));

        let mut payload = signed_test_payload("nonce-1", 1000, "base-sepolia", "0xrecv");
        payload.signature = "!!!".to_string();
        assert!(matches!(
            verify_authorization(&payload),
            Err(PaymentError::MalformedPayment(_))
        ));
    }
}
