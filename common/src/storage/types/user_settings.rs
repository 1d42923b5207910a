use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    storage::{
        keys::user_settings_key,
        kv::{get_json, set_json, StateStore},
    },
};

/// Per-user external inference gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Settings as shown back to the user; the key never leaves the store.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUserSettings {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub path: Option<String>,
    pub has_api_key: bool,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl UserSettings {
    pub async fn read<S>(store: &S, owner: &str) -> Result<Self, AppError>
    where
        S: StateStore + ?Sized,
    {
        Ok(get_json(store, &user_settings_key(owner))
            .await?
            .unwrap_or_default())
    }

    /// Merge `update` over the stored settings; unset fields keep their value.
    pub async fn save<S>(store: &S, owner: &str, update: Self) -> Result<Self, AppError>
    where
        S: StateStore + ?Sized,
    {
        let current = Self::read(store, owner).await?;
        let merged = Self {
            base_url: non_blank(update.base_url).or(current.base_url),
            api_key: non_blank(update.api_key).or(current.api_key),
            model: non_blank(update.model).or(current.model),
            path: non_blank(update.path).or(current.path),
        };
        set_json(store, &user_settings_key(owner), &merged).await?;
        Ok(merged)
    }

    pub fn public_view(&self) -> PublicUserSettings {
        PublicUserSettings {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            path: self.path.clone(),
            has_api_key: self.api_key.as_deref().is_some_and(|k| !k.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryStateStore;

    #[tokio::test]
    async fn save_merges_and_public_view_hides_key() {
        let store = MemoryStateStore::new();
        assert_eq!(
            UserSettings::read(&store, "bob").await.expect("read"),
            UserSettings::default()
        );

        UserSettings::save(
            &store,
            "bob",
            UserSettings {
                base_url: Some("https://gateway.example.com".into()),
                api_key: Some("secret".into()),
                ..Default::default()
            },
        )
        .await
        .expect("first save");
        let merged = UserSettings::save(
            &store,
            "bob",
            UserSettings {
                model: Some("small".into()),
                api_key: Some("  ".into()),
                ..Default::default()
            },
        )
        .await
        .expect("second save");

        assert_eq!(merged.api_key.as_deref(), Some("secret"));
        assert_eq!(merged.model.as_deref(), Some("small"));

        let view = merged.public_view();
        assert!(view.has_api_key);
        let json = serde_json::to_value(&view).expect("serialize");
        assert!(json.get("apiKey").is_none());
    }
}
