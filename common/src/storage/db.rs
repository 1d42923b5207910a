use std::ops::Deref;

use async_trait::async_trait;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

use super::kv::StateStore;
use crate::error::AppError;

const SCALAR_TABLE: &str = "kv";
const HASH_TABLE: &str = "kv_hash";

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// # Initialize a new database client
    ///
    /// # Arguments
    /// * `address` - Connection string understood by the `any` engine
    /// * `username`, `password` - Root credentials
    /// * `namespace`, `database` - Scope used for every query
    ///
    /// # Returns
    /// * `SurrealDbClient` initialized
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // Sign in to database
        db.signin(Root { username, password }).await?;

        // Set namespace
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.build_indexes().await?;
        Ok(())
    }

    pub async fn build_indexes(&self) -> Result<(), Error> {
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_kv_hash_key ON kv_hash FIELDS hkey")
            .await?
            .check()?;
        Ok(())
    }

    fn hash_record_id(hash_key: &str, field: &str) -> String {
        format!("{hash_key}|{field}")
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[async_trait]
impl StateStore for SurrealDbClient {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let values: Vec<String> = self
            .client
            .query("SELECT VALUE value FROM type::thing($table, $id)")
            .bind(("table", SCALAR_TABLE))
            .bind(("id", key.to_owned()))
            .await?
            .take(0)?;
        Ok(values.into_iter().next())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), AppError> {
        self.client
            .query("UPSERT type::thing($table, $id) SET value = $value, updated_at = time::now()")
            .bind(("table", SCALAR_TABLE))
            .bind(("id", key.to_owned()))
            .bind(("value", value))
            .await?
            .check()?;
        Ok(())
    }

    async fn hash_get(&self, hash_key: &str, field: &str) -> Result<Option<String>, AppError> {
        let values: Vec<String> = self
            .client
            .query("SELECT VALUE value FROM type::thing($table, $id)")
            .bind(("table", HASH_TABLE))
            .bind(("id", Self::hash_record_id(hash_key, field)))
            .await?
            .take(0)?;
        Ok(values.into_iter().next())
    }

    async fn hash_set(&self, hash_key: &str, field: &str, value: String) -> Result<(), AppError> {
        self.client
            .query(
                "UPSERT type::thing($table, $id) SET hkey = $hkey, field = $field, value = $value, updated_at = time::now()",
            )
            .bind(("table", HASH_TABLE))
            .bind(("id", Self::hash_record_id(hash_key, field)))
            .bind(("hkey", hash_key.to_owned()))
            .bind(("field", field.to_owned()))
            .bind(("value", value))
            .await?
            .check()?;
        Ok(())
    }

    async fn hash_keys(&self, hash_key: &str) -> Result<Vec<String>, AppError> {
        let mut fields: Vec<String> = self
            .client
            .query("SELECT VALUE field FROM type::table($table) WHERE hkey = $hkey")
            .bind(("table", HASH_TABLE))
            .bind(("hkey", hash_key.to_owned()))
            .await?
            .take(0)?;
        fields.sort();
        fields.dedup();
        Ok(fields)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn setup_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string(); // ensures isolation per test run
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized()
            .await
            .expect("Failed to initialize schema");
        db
    }

    #[tokio::test]
    async fn test_scalar_get_and_set() {
        let db = setup_db().await;

        assert!(db.get("datagen:job:missing").await.expect("get").is_none());

        db.set("datagen:job:a", "{\"id\":\"a\"}".into())
            .await
            .expect("set");
        db.set("datagen:job:a", "{\"id\":\"b\"}".into())
            .await
            .expect("overwrite");

        let value = db.get("datagen:job:a").await.expect("get");
        assert_eq!(value.as_deref(), Some("{\"id\":\"b\"}"));
    }

    #[tokio::test]
    async fn test_hash_fields_are_scoped_by_hash_key() {
        let db = setup_db().await;

        db.hash_set("datagen:job:a:peers", "p2", "2".into())
            .await
            .expect("set p2");
        db.hash_set("datagen:job:a:peers", "p1", "1".into())
            .await
            .expect("set p1");
        db.hash_set("datagen:job:b:peers", "p9", "9".into())
            .await
            .expect("set other hash");

        let keys = db.hash_keys("datagen:job:a:peers").await.expect("keys");
        assert_eq!(keys, vec!["p1".to_string(), "p2".to_string()]);

        let value = db
            .hash_get("datagen:job:a:peers", "p2")
            .await
            .expect("hash get");
        assert_eq!(value.as_deref(), Some("2"));
        assert!(db
            .hash_get("datagen:job:a:peers", "p9")
            .await
            .expect("hash get")
            .is_none());
    }
}
