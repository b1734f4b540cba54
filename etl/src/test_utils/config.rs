use etl_config::shared::{
    CheckpointConfig, CheckpointPhase, ControlsConfig, ElasticsearchConfig, ExtractConfig,
    IndexConfig, LoadConfig, MongoClientOptionsConfig, MongoConfig, ReplicatorConfig,
    TailRetryConfig, TaskConfig, TransformConfig,
};
use secrecy::SecretString;
use serde_json::json;

/// A task scanning `db.collection` from the newest document into `index`.
pub fn test_task(db: &str, collection: &str, index: &str) -> TaskConfig {
    TaskConfig {
        from: CheckpointConfig {
            phase: CheckpointPhase::Scan,
            time: None,
            id: None,
        },
        extract: ExtractConfig {
            db: db.to_string(),
            collection: collection.to_string(),
            query: json!({}),
            projection: json!({}),
        },
        transform: TransformConfig::default(),
        load: LoadConfig {
            index: index.to_string(),
            doc_type: None,
            body: json!({}),
        },
    }
}

/// Tail retry settings that restart immediately and keep the default rewind window.
pub fn immediate_tail_retry() -> TailRetryConfig {
    TailRetryConfig {
        initial_retry_delay_ms: 0,
        max_retry_delay_ms: 0,
        ..TailRetryConfig::default()
    }
}

/// A replicator configuration running `tasks` with small bulks and immediate tail restarts.
pub fn test_replicator_config<I>(tasks: I) -> ReplicatorConfig
where
    I: IntoIterator<Item = (&'static str, TaskConfig)>,
{
    ReplicatorConfig {
        mongodb: MongoConfig {
            url: SecretString::new("mongodb://localhost:27017/?replicaSet=rs0".to_string()),
            options: MongoClientOptionsConfig::default(),
        },
        elasticsearch: ElasticsearchConfig {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            request_timeout_ms: ElasticsearchConfig::DEFAULT_REQUEST_TIMEOUT_MS,
            indices: Vec::new(),
        },
        tasks: tasks
            .into_iter()
            .map(|(name, task)| (name.to_string(), task))
            .collect(),
        controls: ControlsConfig {
            elasticsearch_bulk_size: Some(100),
            tail_retry: immediate_tail_retry(),
            ..ControlsConfig::default()
        },
    }
}

/// An index created at startup with the given body.
pub fn test_index(index: &str) -> IndexConfig {
    IndexConfig {
        index: index.to_string(),
        body: Some(json!({ "settings": { "number_of_shards": 1 } })),
    }
}
