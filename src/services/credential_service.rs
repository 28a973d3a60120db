use std::sync::Arc;

use tracing::{error, warn};

use crate::models::User;
use crate::services::notification_service::NotificationSink;
use crate::store::UserStore;

/// Forgets a credential the provider rejected and tells the user about it.
///
/// Shared by the sync services so that whichever phase first sees the
/// rejection performs the invalidation. Both steps are best effort: a failure
/// is logged and the caller still reports the rejection.
#[derive(Clone)]
pub struct CredentialInvalidator {
    users: Arc<dyn UserStore>,
    notifications: Option<Arc<dyn NotificationSink>>,
}

impl CredentialInvalidator {
    pub fn new(users: Arc<dyn UserStore>, notifications: Option<Arc<dyn NotificationSink>>) -> Self {
        Self { users, notifications }
    }

    pub async fn invalidate(&self, user: &User) {
        warn!("🔒 Provider rejected credential of user {}, clearing it", user.id);

        if let Err(e) = self.users.clear_provider_credential(user.id).await {
            error!("❌ Failed to clear credential of user {}: {}", user.id, e);
        }

        if let Some(sink) = &self.notifications {
            if let Err(e) = sink.credential_invalidated(user).await {
                warn!("Failed to notify user {} about invalidated credential: {}", user.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        async fn credential_invalidated(&self, _user: &User) -> Result<(), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::External("smtp down".into()))
        }
    }

    #[tokio::test]
    async fn test_clears_credential_and_notifies_even_if_sink_fails() {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("ana@example.com".into(), "Ana".into(), Some("item-1".into()));
        store.insert_user(user.clone());
        let sink = Arc::new(CountingSink::default());

        CredentialInvalidator::new(store.clone(), Some(sink.clone()))
            .invalidate(&user)
            .await;

        assert!(!store.user(user.id).unwrap().has_credential());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_user_is_tolerated() {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("ghost@example.com".into(), "Ghost".into(), Some("item-2".into()));
        CredentialInvalidator::new(store, None).invalidate(&user).await;
    }
}
