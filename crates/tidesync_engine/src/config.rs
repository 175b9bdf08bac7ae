//! Configuration for the sync engine.

use std::time::Duration;

/// Default cap on changes and on groups per exchange.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// When a group's tidemark may move after its changes were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TidemarkPolicy {
    /// Advance only if every change of the group was applied, deleted,
    /// discarded or deferred. A failed change holds the cursor so the
    /// coordinator sends the group again.
    #[default]
    AfterFullApply,
    /// Always advance. A change whose commit failed is parked in the
    /// deferred cache instead of being re-requested.
    Unconditional,
}

/// Configuration for sync sessions.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Application identity.
    pub app_id: String,
    /// Device identity.
    pub device_id: String,
    /// Application API access key.
    pub api_access_key: String,
    /// Coordinator base URL.
    pub server_url: String,
    /// Maximum changes uploaded per exchange.
    pub change_batch_size: usize,
    /// Maximum groups polled per exchange.
    pub group_batch_size: usize,
    /// Interval between scheduled ticks.
    pub sync_interval: Duration,
    /// Bound on one exchange with the coordinator.
    pub timeout: Duration,
    /// Tidemark advancement rule.
    pub tidemark_policy: TidemarkPolicy,
}

impl SyncConfig {
    /// Creates a configuration with default batching and timing.
    pub fn new(
        app_id: impl Into<String>,
        device_id: impl Into<String>,
        api_access_key: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            device_id: device_id.into(),
            api_access_key: api_access_key.into(),
            server_url: server_url.into(),
            change_batch_size: DEFAULT_BATCH_SIZE,
            group_batch_size: DEFAULT_BATCH_SIZE,
            sync_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            tidemark_policy: TidemarkPolicy::default(),
        }
    }

    /// Sets the change batch size.
    pub fn with_change_batch_size(mut self, size: usize) -> Self {
        self.change_batch_size = size;
        self
    }

    /// Sets the group batch size.
    pub fn with_group_batch_size(mut self, size: usize) -> Self {
        self.group_batch_size = size;
        self
    }

    /// Sets the scheduler interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the exchange timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the tidemark policy.
    pub fn with_tidemark_policy(mut self, policy: TidemarkPolicy) -> Self {
        self.tidemark_policy = policy;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", "", "", "")
    }
}
