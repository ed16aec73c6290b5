//! Credential resolution for AI providers
//!
//! A provider's `authToken` is either carried inline, read from a secret in
//! the backend's namespace, or left for the request to supply. Secret reads
//! report every missing or malformed key together.

use kgateway_common::crd::{AuthTokenSource, SingleAuthToken};
use kgateway_common::index::{read_secret_keys, SecretIndex};
use kgateway_common::{Error, ObjectSource, Result, AUTHORIZATION_KEY};

/// Prefix removed from secret-sourced tokens; providers add their own
const BEARER_PREFIX: &str = "Bearer ";

/// Resolve a provider credential to a plain token.
///
/// Inline tokens are returned verbatim and passthrough yields an empty
/// string. Secret tokens come from the `Authorization` key with one leading
/// `Bearer ` removed.
pub fn resolve_token(
    token: &SingleAuthToken,
    owner: &ObjectSource,
    secrets: &dyn SecretIndex,
) -> Result<String> {
    let source = token
        .source()
        .map_err(|msg| Error::backend_invalid(owner.namespaced_name(), msg))?;

    match source {
        AuthTokenSource::Inline(value) => Ok(value.to_string()),
        AuthTokenSource::Passthrough => Ok(String::new()),
        AuthTokenSource::SecretRef(name) => {
            let mut values = read_secret_keys(secrets, owner, name, &[AUTHORIZATION_KEY])?;
            let raw = values.remove(AUTHORIZATION_KEY).unwrap_or_default();
            let token = raw.strip_prefix(BEARER_PREFIX).unwrap_or(&raw);
            if token.is_empty() {
                return Err(Error::secret_malformed(
                    owner.namespace.as_str(),
                    name,
                    AUTHORIZATION_KEY,
                    "token is empty after removing the Bearer prefix",
                ));
            }
            Ok(token.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use kgateway_common::index::MemoryIndex;
    use kube::api::ObjectMeta;

    fn owner() -> ObjectSource {
        ObjectSource::new("gateway.kgateway.dev", "Backend", "ai", "llm")
    }

    fn secret(name: &str, data: &[(&str, &[u8])]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ai".into()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn inline_is_verbatim() {
        let index = MemoryIndex::new();
        let token = SingleAuthToken::inline("Bearer sk-test");
        assert_eq!(
            resolve_token(&token, &owner(), &index).unwrap(),
            "Bearer sk-test"
        );
    }

    #[test]
    fn passthrough_is_empty() {
        let index = MemoryIndex::new();
        assert_eq!(
            resolve_token(&SingleAuthToken::passthrough(), &owner(), &index).unwrap(),
            ""
        );
    }

    #[test]
    fn bearer_prefix_stripped_once() {
        let index = MemoryIndex::new();
        index.upsert_secret(secret("k", &[("Authorization", b"Bearer abc")]));
        index.upsert_secret(secret("plain", &[("Authorization", b"abc")]));
        index.upsert_secret(secret("double", &[("Authorization", b"Bearer Bearer abc")]));

        let resolve = |name: &str| resolve_token(&SingleAuthToken::secret_ref(name), &owner(), &index);
        assert_eq!(resolve("k").unwrap(), "abc");
        assert_eq!(resolve("plain").unwrap(), "abc");
        assert_eq!(resolve("double").unwrap(), "Bearer abc");
    }

    #[test]
    fn missing_secret() {
        let index = MemoryIndex::new();
        let err = resolve_token(&SingleAuthToken::secret_ref("nope"), &owner(), &index).unwrap_err();
        assert!(matches!(err, Error::SecretMissing { ref name, .. } if name == "nope"));
    }

    #[test]
    fn empty_and_non_utf8_are_malformed() {
        let index = MemoryIndex::new();
        index.upsert_secret(secret("empty", &[("Authorization", b"")]));
        index.upsert_secret(secret("binary", &[("Authorization", &[0xff, 0xfe])]));
        index.upsert_secret(secret("bare", &[("Authorization", b"Bearer ")]));
        index.upsert_secret(secret("other", &[("token", b"abc")]));

        for name in ["empty", "binary", "bare", "other"] {
            let err =
                resolve_token(&SingleAuthToken::secret_ref(name), &owner(), &index).unwrap_err();
            assert!(
                matches!(err, Error::SecretMalformed { .. }),
                "{name}: {err}"
            );
        }
    }

    #[test]
    fn mismatched_tag_is_invalid() {
        let index = MemoryIndex::new();
        let mut token = SingleAuthToken::inline("x");
        token.kind = kgateway_common::crd::AuthTokenKind::Passthrough;
        let err = resolve_token(&token, &owner(), &index).unwrap_err();
        assert!(matches!(err, Error::BackendInvalid { .. }));
    }
}
