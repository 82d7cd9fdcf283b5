/// Credential scope for one logical invocation.
///
/// The stdio transport builds one of these for the whole process lifetime;
/// the HTTP transport builds a fresh one per inbound request from that
/// request's bearer token. The context only ever travels by argument, so
/// two interleaved requests cannot observe each other's credential at any
/// await point — there is deliberately no task-local or module-level
/// credential store anywhere in this crate.
#[derive(Clone, Debug, Default)]
pub struct CredentialContext {
    request_credential: Option<String>,
    fallback_credential: Option<String>,
}

impl CredentialContext {
    /// Process-wide scope: fallback credential only. Used by stdio sessions.
    pub fn process_wide(fallback: Option<String>) -> Self {
        Self {
            request_credential: None,
            fallback_credential: fallback,
        }
    }

    /// Per-request scope. A credential extracted from the request wins over
    /// the process-wide fallback.
    pub fn for_request(credential: Option<String>, fallback: Option<String>) -> Self {
        Self {
            request_credential: credential,
            fallback_credential: fallback,
        }
    }

    /// Resolve the active credential: request value first, then fallback.
    pub fn resolve(&self) -> Option<&str> {
        self.request_credential
            .as_deref()
            .or(self.fallback_credential.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_credential_wins_over_fallback() {
        let ctx = CredentialContext::for_request(
            Some("request-key".to_string()),
            Some("fallback-key".to_string()),
        );
        assert_eq!(ctx.resolve(), Some("request-key"));
    }

    #[test]
    fn fallback_applies_when_request_credential_is_absent() {
        let ctx = CredentialContext::for_request(None, Some("fallback-key".to_string()));
        assert_eq!(ctx.resolve(), Some("fallback-key"));

        let ctx = CredentialContext::process_wide(Some("fallback-key".to_string()));
        assert_eq!(ctx.resolve(), Some("fallback-key"));
    }

    #[test]
    fn resolves_to_none_without_any_credential() {
        assert_eq!(CredentialContext::for_request(None, None).resolve(), None);
        assert_eq!(CredentialContext::process_wide(None).resolve(), None);
    }

    #[tokio::test]
    async fn concurrent_scopes_never_observe_each_other() {
        // Two invocations with distinct credentials, interleaved on the same
        // scheduler. Each must see only its own value across await points.
        async fn observe(ctx: CredentialContext, expected: &str) {
            for _ in 0..50 {
                assert_eq!(ctx.resolve(), Some(expected));
                tokio::task::yield_now().await;
            }
        }

        let first = CredentialContext::for_request(
            Some("tenant-a-key".to_string()),
            Some("shared-fallback".to_string()),
        );
        let second = CredentialContext::for_request(
            Some("tenant-b-key".to_string()),
            Some("shared-fallback".to_string()),
        );

        tokio::join!(
            observe(first, "tenant-a-key"),
            observe(second, "tenant-b-key"),
        );
    }
}
