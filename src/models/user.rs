use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// A user of the app; `provider_credential` is the provider connection (item) id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: uuid::Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub provider_credential: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl User {
    pub fn new(email: String, name: String, provider_credential: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            email,
            name,
            provider_credential,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn has_credential(&self) -> bool {
        self.provider_credential
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }
}
