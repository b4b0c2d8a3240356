use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
