use anyhow::anyhow;
use totp_rs::{Algorithm, Secret, TOTP};

/// Time-based code checker for authenticator secrets.
#[derive(Debug, Clone, Copy)]
pub struct TotpVerifier {
    digits: usize,
    skew: u8,
    step: u64,
}

impl Default for TotpVerifier {
    fn default() -> Self {
        Self {
            digits: 6,
            skew: 1,
            step: 30,
        }
    }
}

impl TotpVerifier {
    pub fn new(step_seconds: u64) -> Self {
        Self {
            step: step_seconds,
            ..Self::default()
        }
    }

    pub fn step_seconds(&self) -> u64 {
        self.step
    }

    fn totp(&self, secret_base32: &str) -> anyhow::Result<TOTP> {
        let bytes = Secret::Encoded(secret_base32.trim().to_uppercase())
            .to_bytes()
            .map_err(|e| anyhow!("Invalid TOTP secret: {e:?}"))?;
        TOTP::new(Algorithm::SHA1, self.digits, self.skew, self.step, bytes)
            .map_err(|e| anyhow!("TOTP init error: {e}"))
    }

    /// Check `code` against the current window (±1 step). Malformed secrets never match.
    pub fn verify(&self, secret_base32: &str, code: &str) -> bool {
        match self.totp(secret_base32) {
            Ok(totp) => totp.check_current(code).unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting code for unusable TOTP secret");
                false
            }
        }
    }

    pub fn current_code(&self, secret_base32: &str) -> anyhow::Result<String> {
        self.totp(secret_base32)?
            .generate_current()
            .map_err(|e| anyhow!("System clock error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";

    #[test]
    fn test_current_code_verifies() {
        let verifier = TotpVerifier::default();
        let code = verifier.current_code(SECRET).unwrap();
        assert_eq!(code.len(), 6);
        assert!(verifier.verify(SECRET, &code));
    }

    #[test]
    fn test_wrong_code_rejected() {
        let verifier = TotpVerifier::default();
        let code = verifier.current_code(SECRET).unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        assert!(!verifier.verify(SECRET, wrong));
    }

    #[test]
    fn test_malformed_secret_never_matches() {
        assert!(!TotpVerifier::default().verify("not base32!", "123456"));
    }
}
