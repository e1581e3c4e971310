use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies HMAC-SHA256 signatures produced by the payment provider.
///
/// Two secrets are in play: the API secret signs the client-side
/// `order_id|payment_id` pair returned by the checkout widget, and the
/// webhook secret signs raw webhook bodies. Every check answers a plain
/// boolean; mismatches, empty input and unusable secrets are all `false`.
#[derive(Clone)]
pub struct SignatureVerifier {
    api_secret: String,
    webhook_secret: String,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("api_secret", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(api_secret: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            api_secret: api_secret.into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Checks the signature the client received after paying.
    pub fn verify_payment(
        &self,
        provider_order_id: &str,
        provider_payment_id: &str,
        signature: &str,
    ) -> bool {
        if provider_order_id.is_empty() || provider_payment_id.is_empty() {
            return false;
        }
        let message = payment_message(provider_order_id, provider_payment_id);
        Self::verify_with_secret(&self.api_secret, message.as_bytes(), signature)
    }

    /// Checks a webhook delivery against its raw, unparsed body.
    pub fn verify_webhook(&self, body: &[u8], signature: &str) -> bool {
        Self::verify_with_secret(&self.webhook_secret, body, signature)
    }

    /// Checks `signature` over `message` with an explicit secret.
    pub fn verify_with_secret(secret: &str, message: &[u8], signature: &str) -> bool {
        if secret.is_empty() || signature.is_empty() {
            return false;
        }
        match Self::sign(secret, message) {
            Some(expected) => constant_time_eq(expected.as_bytes(), signature.as_bytes()),
            None => false,
        }
    }

    /// Lowercase hex HMAC-SHA256 of `message`.
    pub fn sign(secret: &str, message: &[u8]) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(message);
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

/// The message the provider signs for client-side payment confirmation.
pub fn payment_message(provider_order_id: &str, provider_payment_id: &str) -> String {
    format!("{}|{}", provider_order_id, provider_payment_id)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.iter().zip(b) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const API_SECRET: &str = "test_api_secret";
    const WEBHOOK_SECRET: &str = "test_webhook_secret";

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(API_SECRET, WEBHOOK_SECRET)
    }

    #[test]
    fn known_vector_matches() {
        // RFC 4231 test case 2
        let sig = SignatureVerifier::sign("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn payment_signature_round_trip() {
        let sig = SignatureVerifier::sign(API_SECRET, b"order_1|pay_1").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(verifier().verify_payment("order_1", "pay_1", &sig));
        assert!(!verifier().verify_payment("order_1", "pay_2", &sig));
        assert!(!verifier().verify_payment("order_2", "pay_1", &sig));
    }

    #[test]
    fn payment_signature_requires_api_secret() {
        let with_webhook_secret = SignatureVerifier::sign(WEBHOOK_SECRET, b"order_1|pay_1").unwrap();
        assert!(!verifier().verify_payment("order_1", "pay_1", &with_webhook_secret));
    }

    #[test]
    fn webhook_signature_covers_raw_body() {
        let body = br#"{"event":"payment.captured"}"#;
        let sig = SignatureVerifier::sign(WEBHOOK_SECRET, body).unwrap();
        assert!(verifier().verify_webhook(body, &sig));

        let reformatted = br#"{ "event": "payment.captured" }"#;
        assert!(!verifier().verify_webhook(reformatted, &sig));
    }

    #[test]
    fn empty_inputs_never_verify() {
        assert!(!verifier().verify_webhook(b"{}", ""));
        assert!(!verifier().verify_payment("", "pay_1", "00"));
        assert!(!SignatureVerifier::verify_with_secret("", b"{}", "abc"));

        let unconfigured = SignatureVerifier::new("", "");
        let sig = SignatureVerifier::sign("anything", b"{}").unwrap();
        assert!(!unconfigured.verify_webhook(b"{}", &sig));
    }

    #[test]
    fn uppercase_or_truncated_hex_is_rejected() {
        let sig = SignatureVerifier::sign(WEBHOOK_SECRET, b"body").unwrap();
        assert!(!verifier().verify_webhook(b"body", &sig.to_uppercase()));
        assert!(!verifier().verify_webhook(b"body", &sig[..63]));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let printed = format!("{:?}", verifier());
        assert!(!printed.contains(API_SECRET));
        assert!(!printed.contains(WEBHOOK_SECRET));
    }

    proptest! {
        #[test]
        fn any_signed_body_verifies(body in proptest::collection::vec(any::<u8>(), 0..512)) {
            let sig = SignatureVerifier::sign(WEBHOOK_SECRET, &body).unwrap();
            prop_assert!(verifier().verify_webhook(&body, &sig));
        }

        #[test]
        fn flipping_any_signature_char_fails(
            order in "order_[A-Za-z0-9]{4,14}",
            payment in "pay_[A-Za-z0-9]{4,14}",
            idx in 0usize..64,
        ) {
            let sig = SignatureVerifier::sign(API_SECRET, payment_message(&order, &payment).as_bytes()).unwrap();
            let mut bytes = sig.into_bytes();
            bytes[idx] = if bytes[idx] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(bytes).unwrap();
            prop_assert!(!verifier().verify_payment(&order, &payment, &tampered));
        }

        #[test]
        fn signature_is_bound_to_secret(secret in "[a-z0-9]{1,32}") {
            prop_assume!(secret != API_SECRET);
            let sig = SignatureVerifier::sign(&secret, b"order_a|pay_b").unwrap();
            prop_assert!(!verifier().verify_payment("order_a", "pay_b", &sig));
        }
    }
}
