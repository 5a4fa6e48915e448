//! Job type registry.
//!
//! Built once at startup: each configured type name gets its own FIFO queue,
//! provisioned one after another in configuration order. Any failure aborts
//! the whole build, so a registry that exists always has a queue for every
//! type.

use tracing::{debug, info};

use crate::error::SchedulerError;
use crate::queue::{queue_name, QueueAttributes, QueueRef, QueueService};

/// A schedulable job type and its provisioned queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobType {
    name: String,
    queue: QueueRef,
}

impl JobType {
    /// Creates a job type bound to `queue`.
    pub fn new(name: impl Into<String>, queue: QueueRef) -> Self {
        Self {
            name: name.into(),
            queue,
        }
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle of the type's queue.
    pub fn queue(&self) -> &QueueRef {
        &self.queue
    }
}

/// Resolves job type names to their provisioned queues.
#[derive(Debug, Clone, Default)]
pub struct JobTypeRegistry {
    types: Vec<JobType>,
}

impl JobTypeRegistry {
    /// Provisions one queue per type name, strictly in order.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Provisioning` for the first type whose queue
    /// cannot be created. Nothing provisioned before it is kept.
    pub async fn provision<S: AsRef<str>>(
        names: &[S],
        attributes: &QueueAttributes,
        queues: &dyn QueueService,
    ) -> Result<Self, SchedulerError> {
        let mut types = Vec::with_capacity(names.len());

        for name in names.iter().map(AsRef::as_ref) {
            let queue = queues
                .create_queue(&queue_name(name), attributes)
                .await
                .map_err(|source| SchedulerError::Provisioning {
                    job_type: name.to_string(),
                    source,
                })?;
            debug!(job_type = %name, queue = %queue, "Provisioned job type");
            types.push(JobType::new(name, queue));
        }

        info!(count = types.len(), "Job type registry ready");
        Ok(Self { types })
    }

    /// Builds a registry from already provisioned types.
    pub fn from_types(types: Vec<JobType>) -> Self {
        Self { types }
    }

    /// Looks up a type by name.
    pub fn resolve(&self, name: &str) -> Option<&JobType> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Type names in provisioning order.
    pub fn names(&self) -> Vec<&str> {
        self.types.iter().map(JobType::name).collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
