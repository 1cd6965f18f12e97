//! [`loro_hub_core::auth::Authenticator`] backed by HMAC-signed JWTs.
//!
//! A token grants access to one document name (or `"*"` for every
//! document) and carries whether that access is read-write.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use loro_hub_core::auth::{Authenticator, Decision};
use loro_hub_core::document::DocumentName;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Claims {
	/// Document this token grants access to, or `"*"` for any document.
	doc: String,
	#[serde(default)]
	write: bool,
}

pub struct JwtAuthenticator {
	decoding_key: DecodingKey,
	validation: Validation,
}

impl JwtAuthenticator {
	#[must_use]
	pub fn from_hmac_secret(secret: &[u8]) -> Self {
		let mut validation = Validation::new(Algorithm::HS256);
		validation.validate_exp = true;
		Self {
			decoding_key: DecodingKey::from_secret(secret),
			validation,
		}
	}
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
	async fn authenticate(&self, document: &DocumentName, token: &str) -> Decision {
		let claims = match decode::<Claims>(token, &self.decoding_key, &self.validation) {
			Ok(data) => data.claims,
			Err(e) => {
				debug!(document = %document, error = %e, "rejecting token");
				return Decision::Denied;
			}
		};

		if claims.doc != "*" && claims.doc != document.as_ref() {
			return Decision::Denied;
		}

		if claims.write {
			Decision::ReadWrite
		} else {
			Decision::ReadOnly
		}
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use jsonwebtoken::{encode, EncodingKey, Header};

	fn token(doc: &str, write: bool, secret: &[u8]) -> String {
		#[derive(serde::Serialize)]
		struct Out<'a> {
			doc: &'a str,
			write: bool,
			exp: usize,
		}
		encode(
			&Header::new(Algorithm::HS256),
			&Out { doc, write, exp: 9_999_999_999 },
			&EncodingKey::from_secret(secret),
		)
		.unwrap()
	}

	#[tokio::test]
	async fn grants_read_write_for_matching_document() {
		let secret = b"test-secret";
		let auth = JwtAuthenticator::from_hmac_secret(secret);
		let doc: DocumentName = "doc-1".into();
		let decision = auth.authenticate(&doc, &token("doc-1", true, secret)).await;
		assert_eq!(decision, Decision::ReadWrite);
	}

	#[tokio::test]
	async fn denies_token_scoped_to_a_different_document() {
		let secret = b"test-secret";
		let auth = JwtAuthenticator::from_hmac_secret(secret);
		let doc: DocumentName = "doc-1".into();
		let decision = auth.authenticate(&doc, &token("doc-2", true, secret)).await;
		assert_eq!(decision, Decision::Denied);
	}

	#[tokio::test]
	async fn wildcard_token_grants_any_document() {
		let secret = b"test-secret";
		let auth = JwtAuthenticator::from_hmac_secret(secret);
		let doc: DocumentName = "doc-7".into();
		let decision = auth.authenticate(&doc, &token("*", false, secret)).await;
		assert_eq!(decision, Decision::ReadOnly);
	}

	#[tokio::test]
	async fn malformed_token_is_denied() {
		let secret = b"test-secret";
		let auth = JwtAuthenticator::from_hmac_secret(secret);
		let doc: DocumentName = "doc-1".into();
		let decision = auth.authenticate(&doc, "not-a-jwt").await;
		assert_eq!(decision, Decision::Denied);
	}
}
