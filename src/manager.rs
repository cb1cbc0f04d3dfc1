use std::sync::Arc;

use chrono::Utc;
use url::Url;

use crate::error::{Result, WebhookError};
use crate::store::WebhookStore;
use crate::types::{OwnerId, WebhookConfiguration};

/// Per-owner webhook configuration, one live destination at a time.
#[derive(Clone)]
pub struct WebhookManager {
    store: Arc<WebhookStore>,
}

impl WebhookManager {
    pub fn new(store: Arc<WebhookStore>) -> Self {
        Self { store }
    }

    /// Store `url` and `secret` as the owner's destination, replacing any
    /// previous configuration wholesale. Returns `true` alongside the config
    /// when no configuration existed before.
    ///
    /// `created_at` carries over from the replaced configuration.
    pub async fn register(
        &self,
        owner: &OwnerId,
        url: &str,
        secret: Option<String>,
    ) -> Result<(WebhookConfiguration, bool)> {
        let url = validate_destination(url)?;
        let secret = secret.filter(|s| !s.is_empty());

        let (config, is_new) = self
            .store
            .mutate(|file| {
                let entry = file.entry(owner);
                let now = Utc::now();
                let previous = entry.configuration.take();
                let config = WebhookConfiguration {
                    owner_id: owner.clone(),
                    url,
                    secret,
                    active: true,
                    created_at: previous.as_ref().map_or(now, |p| p.created_at),
                    updated_at: now,
                };
                entry.configuration = Some(config.clone());
                (config, previous.is_none())
            })
            .await?;

        tracing::info!(
            owner = %owner,
            url = %config.url,
            signed = config.secret.is_some(),
            is_new,
            "webhook registered"
        );
        Ok((config, is_new))
    }

    pub async fn get(&self, owner: &OwnerId) -> Option<WebhookConfiguration> {
        self.store.configuration(owner).await
    }

    pub async fn remove(&self, owner: &OwnerId) -> Result<()> {
        let removed = self
            .store
            .mutate(|file| {
                let removed = file
                    .owners
                    .get_mut(owner)
                    .and_then(|entry| entry.configuration.take());
                file.compact_owner(owner);
                removed
            })
            .await?;

        match removed {
            Some(_) => {
                tracing::info!(owner = %owner, "webhook removed");
                Ok(())
            }
            None => Err(WebhookError::NotConfigured),
        }
    }
}

/// Accept only absolute http(s) URLs with a host.
///
/// Returns the caller's URL trimmed of surrounding whitespace, otherwise
/// exactly as given.
pub fn validate_destination(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed)
        .map_err(|e| WebhookError::InvalidDestination(format!("{raw:?}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(WebhookError::InvalidDestination(format!(
            "scheme {:?} is not http or https",
            parsed.scheme()
        )));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => {
            return Err(WebhookError::InvalidDestination(format!(
                "{raw:?} has no host"
            )))
        }
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(dir: &tempfile::TempDir) -> WebhookManager {
        WebhookManager::new(Arc::new(WebhookStore::new(dir.path().join("webhooks.json"))))
    }

    #[test]
    fn rejects_non_http_schemes() {
        for url in [
            "ftp://example.test/hook",
            "file:///etc/passwd",
            "javascript:alert(1)",
            "mailto:ops@example.test",
            "ws://example.test/socket",
            "example.test/hook",
            "",
            "http://",
        ] {
            assert!(
                matches!(
                    validate_destination(url),
                    Err(WebhookError::InvalidDestination(_))
                ),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn accepts_http_and_https() {
        assert_eq!(
            validate_destination("https://example.test/hook").unwrap(),
            "https://example.test/hook"
        );
        assert!(validate_destination("http://127.0.0.1:9000/cb?x=1").is_ok());
    }

    #[test]
    fn keeps_destination_as_given() {
        assert_eq!(
            validate_destination("  https://example.test  ").unwrap(),
            "https://example.test"
        );
        assert_eq!(
            validate_destination("https://EXAMPLE.test:443/a/../hook").unwrap(),
            "https://EXAMPLE.test:443/a/../hook"
        );
    }

    #[tokio::test]
    async fn register_stores_url_without_normalizing() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        let owner = OwnerId::new("acct-1");

        let (config, _) = manager
            .register(&owner, "https://example.test", None)
            .await
            .unwrap();
        assert_eq!(config.url, "https://example.test");
        assert_eq!(manager.get(&owner).await.unwrap().url, "https://example.test");
    }

    #[tokio::test]
    async fn register_then_replace() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        let owner = OwnerId::new("acct-1");

        let (first, is_new) = manager
            .register(&owner, "https://example.test/a", Some("s3cret".into()))
            .await
            .unwrap();
        assert!(is_new);
        assert!(first.active);

        let (second, is_new) = manager
            .register(&owner, "https://example.test/b", None)
            .await
            .unwrap();
        assert!(!is_new);
        assert_eq!(second.url, "https://example.test/b");
        assert_eq!(second.secret, None);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);

        assert_eq!(manager.get(&owner).await.unwrap(), second);
    }

    #[tokio::test]
    async fn empty_secret_is_absent() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        let owner = OwnerId::new("acct-1");
        let (config, _) = manager
            .register(&owner, "https://example.test/a", Some(String::new()))
            .await
            .unwrap();
        assert!(config.secret.is_none());
    }

    #[tokio::test]
    async fn invalid_url_leaves_existing_config() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        let owner = OwnerId::new("acct-1");
        manager
            .register(&owner, "https://example.test/a", None)
            .await
            .unwrap();

        let err = manager
            .register(&owner, "ftp://example.test/a", None)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidDestination(_)));
        assert_eq!(
            manager.get(&owner).await.unwrap().url,
            "https://example.test/a"
        );
    }

    #[tokio::test]
    async fn remove_requires_configuration() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        let owner = OwnerId::new("acct-1");

        assert!(matches!(
            manager.remove(&owner).await,
            Err(WebhookError::NotConfigured)
        ));

        manager
            .register(&owner, "https://example.test/a", None)
            .await
            .unwrap();
        manager.remove(&owner).await.unwrap();
        assert!(manager.get(&owner).await.is_none());
        assert!(matches!(
            manager.remove(&owner).await,
            Err(WebhookError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn concurrent_registrations_leave_one_winner() {
        let dir = tempdir().unwrap();
        let manager = manager(&dir);
        let owner = OwnerId::new("acct-1");

        let mut handles = Vec::new();
        for i in 0..10 {
            let manager = manager.clone();
            let owner = owner.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .register(
                        &owner,
                        &format!("https://example.test/{i}"),
                        Some(format!("secret-{i}")),
                    )
                    .await
                    .unwrap()
            }));
        }
        let mut new_count = 0;
        for handle in handles {
            if handle.await.unwrap().1 {
                new_count += 1;
            }
        }
        assert_eq!(new_count, 1);

        let config = manager.get(&owner).await.unwrap();
        let suffix = config.url.rsplit('/').next().unwrap();
        assert_eq!(config.secret.as_deref(), Some(format!("secret-{suffix}").as_str()));
    }
}
