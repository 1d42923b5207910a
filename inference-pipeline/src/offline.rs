use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::utils::clock::Clock;
use rand::{rngs::StdRng, SeedableRng};
use serde_json::Value;
use tracing::debug;

use crate::{
    config::InferenceConfig,
    generator::{Generated, InferenceFailure, RecordGenerator},
    synthetic::{post_process_record, random_record, random_schema, record_from_schema},
};

/// Fabricates schemas and records locally. Never fails and never retries.
pub struct OfflineGenerator {
    rng: Mutex<StdRng>,
    clock: Arc<dyn Clock>,
}

impl OfflineGenerator {
    pub fn new(seed: Option<u64>, clock: Arc<dyn Clock>) -> Self {
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            rng: Mutex::new(rng),
            clock,
        }
    }
}

#[async_trait]
impl RecordGenerator for OfflineGenerator {
    async fn generate_schema(
        &self,
        prompt: &str,
        dataset_mode: bool,
        _config: &InferenceConfig,
    ) -> Result<Generated<Value>, InferenceFailure> {
        debug!(prompt_len = prompt.len(), dataset_mode, "Offline schema");
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Generated {
            value: random_schema(&mut *rng, dataset_mode),
            failed_attempts: 0,
        })
    }

    async fn generate_record(
        &self,
        _instructions: &str,
        schema: Option<&Value>,
        _dataset_mode: bool,
        _config: &InferenceConfig,
    ) -> Result<Generated<Value>, InferenceFailure> {
        let now = self.clock.now();
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let value = match schema.and_then(|s| record_from_schema(s, &mut *rng, now)) {
            Some(record) => post_process_record(Value::Object(record), schema, &mut *rng, now),
            None => random_record(&mut *rng, now),
        };
        Ok(Generated {
            value,
            failed_attempts: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::utils::clock::ManualClock;
    use serde_json::json;

    fn generator(seed: u64) -> OfflineGenerator {
        let clock = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("date");
        OfflineGenerator::new(Some(seed), Arc::new(ManualClock::new(clock)))
    }

    #[tokio::test]
    async fn seeded_output_is_deterministic() {
        let config = InferenceConfig::default();
        let a = generator(42);
        let b = generator(42);

        let schema_a = a.generate_schema("p", false, &config).await.expect("schema");
        let schema_b = b.generate_schema("p", false, &config).await.expect("schema");
        assert_eq!(schema_a, schema_b);
        assert_eq!(schema_a.failed_attempts, 0);

        let record_a = a
            .generate_record("p", Some(&schema_a.value), false, &config)
            .await
            .expect("record");
        let record_b = b
            .generate_record("p", Some(&schema_b.value), false, &config)
            .await
            .expect("record");
        assert_eq!(record_a, record_b);
    }

    #[tokio::test]
    async fn records_follow_the_schema_fields() {
        let schema = json!({"properties": {"name": {"type": "string"}, "age": {"type": "integer"}}});
        let record = generator(1)
            .generate_record("p", Some(&schema), false, &InferenceConfig::default())
            .await
            .expect("record");
        let keys: Vec<&String> = record.value.as_object().expect("object").keys().collect();
        assert_eq!(keys.len(), 2);
        assert!(record.value["age"].is_i64());
    }

    #[tokio::test]
    async fn schemaless_records_are_random() {
        let record = generator(3)
            .generate_record("p", None, false, &InferenceConfig::default())
            .await
            .expect("record");
        assert!(record.value["id"].is_string());
        assert_eq!(record.value["generatedAt"], "2024-05-01T12:00:00.000Z");
    }
}
