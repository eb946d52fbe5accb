use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("invalid cron expression '{expression}': {source}")]
    InvalidCronExpression {
        expression: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("unknown timezone: {timezone}")]
    UnknownTimezone { timezone: String },

    #[error("invalid interval: {reason}")]
    InvalidInterval { reason: String },

    #[error("{trigger} of job '{job_id}' has no more occurrences")]
    NoMoreOccurrences { job_id: String, trigger: String },

    #[error("no registered scheduler is able to process job '{job_id}'")]
    JobNotSchedulable { job_id: String },

    #[error("job '{job_id}' should be handled by a single scheduler, but {schedulers:?} all accept it")]
    JobMultipleSchedulers {
        job_id: String,
        schedulers: Vec<&'static str>,
    },

    #[error("there are multiple registrations of a job with id '{job_id}'")]
    DuplicateJobId { job_id: String },

    #[error("{scheduler} scheduler cannot handle the trigger of job '{job_id}'")]
    UnsupportedTrigger {
        scheduler: &'static str,
        job_id: String,
    },

    #[error(
        "lease on job '{job_id}' held by instance '{instance_id}' is no longer valid; it expired \
         or was removed from the store"
    )]
    LockNotValid { job_id: String, instance_id: String },

    #[error("virtual time only moves forward: {now} -> {requested}")]
    TimeTravel {
        now: chrono::DateTime<chrono::Utc>,
        requested: chrono::DateTime<chrono::Utc>,
    },

    #[error("not a plain SQL identifier: {name:?}")]
    InvalidIdentifier { name: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unknown_timezone(timezone: impl Into<String>) -> Self {
        Self::UnknownTimezone {
            timezone: timezone.into(),
        }
    }

    #[must_use]
    pub fn invalid_interval(reason: impl Into<String>) -> Self {
        Self::InvalidInterval {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn lock_not_valid(job_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self::LockNotValid {
            job_id: job_id.into(),
            instance_id: instance_id.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Configuration faults that retrying cannot fix. A run-loop that hits one
    /// stops instead of backing off.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidCronExpression { .. }
                | Self::UnknownTimezone { .. }
                | Self::InvalidInterval { .. }
                | Self::NoMoreOccurrences { .. }
                | Self::JobNotSchedulable { .. }
                | Self::JobMultipleSchedulers { .. }
                | Self::DuplicateJobId { .. }
                | Self::UnsupportedTrigger { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
