//! Builder for signed test bearer tokens.

use crate::crypto_fixtures::TestKeypair;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};

/// Issuer used by the harness configuration.
pub const TEST_ISSUER: &str = "https://login.test/tenant/v2.0";

/// Audience used by the harness configuration.
pub const TEST_AUDIENCE: &str = "api://data-api-test";

/// Email placed in tokens by default.
pub const TEST_EMAIL: &str = "ada@example.com";

/// Builder for signed test tokens.
///
/// # Example
/// ```rust,ignore
/// let keypair = TestKeypair::primary("key-1");
/// let token = TestTokenBuilder::new()
///     .with_email("grace@example.com")
///     .expires_in(600)
///     .sign(&keypair);
/// ```
#[derive(Debug, Clone)]
pub struct TestTokenBuilder {
    issuer: Option<String>,
    /// String or array, as issued.
    audience: Option<Value>,
    subject: String,
    email: Option<String>,
    exp: Option<i64>,
    iat: Option<i64>,
    nbf: Option<i64>,
    algorithm: Algorithm,
    kid: Option<String>,
    extra: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Defaults: harness issuer and audience, one hour lifetime, `TEST_EMAIL`.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            issuer: Some(TEST_ISSUER.to_string()),
            audience: Some(json!(TEST_AUDIENCE)),
            subject: "test-subject".to_string(),
            email: Some(TEST_EMAIL.to_string()),
            exp: Some((now + Duration::seconds(3600)).timestamp()),
            iat: Some(now.timestamp()),
            nbf: None,
            algorithm: Algorithm::RS256,
            kid: None,
            extra: Map::new(),
        }
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.issuer = Some(issuer.to_string());
        self
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.audience = Some(json!(audience));
        self
    }

    /// Emit `aud` as an array.
    pub fn with_audiences(mut self, audiences: &[&str]) -> Self {
        self.audience = Some(json!(audiences));
        self
    }

    pub fn for_subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn without_email(mut self) -> Self {
        self.email = None;
        self
    }

    /// Set expiration in seconds from now (negative for the past).
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = Some((Utc::now() + Duration::seconds(seconds)).timestamp());
        self
    }

    pub fn without_expiry(mut self) -> Self {
        self.exp = None;
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = Some(timestamp);
        self
    }

    /// Set not-before in seconds from now.
    pub fn not_before_in(mut self, seconds: i64) -> Self {
        self.nbf = Some((Utc::now() + Duration::seconds(seconds)).timestamp());
        self
    }

    /// Header `alg`; the signature is produced with the same algorithm.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Override the header `kid` (defaults to the signing keypair's kid).
    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.extra.insert(name.to_string(), value);
        self
    }

    /// The claim set as JSON.
    pub fn claims(&self) -> Value {
        let mut claims = self.extra.clone();
        claims.insert("sub".to_string(), json!(self.subject));
        if let Some(iss) = &self.issuer {
            claims.insert("iss".to_string(), json!(iss));
        }
        if let Some(aud) = &self.audience {
            claims.insert("aud".to_string(), aud.clone());
        }
        if let Some(email) = &self.email {
            claims.insert("email".to_string(), json!(email));
        }
        if let Some(exp) = self.exp {
            claims.insert("exp".to_string(), json!(exp));
        }
        if let Some(iat) = self.iat {
            claims.insert("iat".to_string(), json!(iat));
        }
        if let Some(nbf) = self.nbf {
            claims.insert("nbf".to_string(), json!(nbf));
        }
        Value::Object(claims)
    }

    /// Sign with `keypair` and return the compact token.
    ///
    /// # Panics
    ///
    /// Panics if the fixture key cannot be loaded; fixtures are static, so
    /// this indicates a broken test setup.
    pub fn sign(&self, keypair: &TestKeypair) -> String {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.kid.clone().unwrap_or_else(|| keypair.kid().to_string()));

        let key = EncodingKey::from_rsa_pem(keypair.private_pem().as_bytes())
            .expect("fixture RSA key must load");
        encode(&header, &self.claims(), &key).expect("signing a test token must succeed")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace the signature segment with another token's signature.
///
/// Produces a structurally valid token whose signature does not verify.
pub fn with_foreign_signature(token: &str, donor: &str) -> String {
    let head = token.rsplit_once('.').map_or(token, |(head, _)| head);
    let signature = donor.rsplit_once('.').map_or("", |(_, sig)| sig);
    format!("{head}.{signature}")
}
