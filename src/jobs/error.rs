use thiserror::Error;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("job payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("job execution failed: {message}")]
    Execution { message: String, retryable: bool },
}

impl JobError {
    pub fn execution(message: impl Into<String>, retryable: bool) -> Self {
        JobError::Execution {
            message: message.into(),
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Redis(_) => true,
            JobError::Payload(_) => false,
            JobError::Execution { retryable, .. } => *retryable,
        }
    }
}
