//! In-process stand-ins for external systems.

use async_trait::async_trait;
use dynsec_core::template::split_statements;
use dynsec_core::{Error, ProviderConfig, ProviderType, Result};
use dynsec_lifecycle::{InMemoryLeaseStore, LeaseManager, LifecycleConfig};
use dynsec_providers::{BrokerConfig, ConnectionBroker, ExecOutcome, Intent, ProviderRegistry, StatementBatch};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One statement batch seen by [`RecordingBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub provider: ProviderType,
    pub intent: Intent,
    pub script: String,
}

#[derive(Default)]
struct Behaviour {
    delay: Option<Duration>,
    reject: Option<Intent>,
    unreachable: bool,
    absent: bool,
    fail_statement: Option<usize>,
}

/// Connection broker that records every batch instead of contacting a target.
#[derive(Clone, Default)]
pub struct RecordingBroker {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    pings: Arc<Mutex<usize>>,
    behaviour: Arc<Mutex<Behaviour>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every batch for `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.behaviour.lock().unwrap().delay = Some(delay);
        self
    }

    /// Answer batches of `intent` as a statement the target refused.
    pub fn rejecting(self, intent: Intent) -> Self {
        self.behaviour.lock().unwrap().reject = Some(intent);
        self
    }

    /// Answer every call as a transport failure.
    pub fn unreachable(self) -> Self {
        self.behaviour.lock().unwrap().unreachable = true;
        self
    }

    /// Refuse the statement at `index` of every provisioning script, after
    /// the statements before it have been applied.
    pub fn failing_statement(self, index: usize) -> Self {
        self.behaviour.lock().unwrap().fail_statement = Some(index);
        self
    }

    /// Report revocations as targeting an already-absent principal.
    pub fn absent(self) -> Self {
        self.behaviour.lock().unwrap().absent = true;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn intents(&self) -> Vec<Intent> {
        self.calls().into_iter().map(|c| c.intent).collect()
    }

    pub fn ping_count(&self) -> usize {
        *self.pings.lock().unwrap()
    }

    /// Registry with every default driver wired to this broker.
    pub fn registry(&self) -> ProviderRegistry {
        ProviderRegistry::with_broker(Arc::new(self.clone()), BrokerConfig::default())
    }

    /// Lease manager over [`Self::registry`] and a fresh in-memory store.
    pub fn manager(&self, config: LifecycleConfig) -> LeaseManager {
        LeaseManager::new(
            Arc::new(self.registry()),
            Arc::new(InMemoryLeaseStore::new()),
            config,
        )
    }
}

#[async_trait]
impl ConnectionBroker for RecordingBroker {
    async fn execute(&self, config: &ProviderConfig, batch: &StatementBatch) -> Result<ExecOutcome> {
        let provider = config.provider_type();
        let (delay, reject, unreachable, absent, fail_statement) = {
            let b = self.behaviour.lock().unwrap();
            (b.delay, b.reject, b.unreachable, b.absent, b.fail_statement)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unreachable {
            return Err(Error::connection(provider, "connection refused"));
        }

        self.calls.lock().unwrap().push(RecordedCall {
            provider,
            intent: batch.intent,
            script: batch.script.clone(),
        });

        if let Some(index) = fail_statement.filter(|_| batch.intent == Intent::Provision) {
            let total = split_statements(&batch.script).len();
            if index == 0 {
                return Err(Error::rejected(provider, "statement refused by target"));
            }
            if index < total {
                return Err(Error::ProvisioningFailed {
                    provider,
                    entity_id: None,
                    message: format!(
                        "{} of {} statements applied before failure: statement refused by target",
                        index, total
                    ),
                });
            }
        }
        if reject == Some(batch.intent) {
            return Err(Error::rejected(provider, "statement refused by target"));
        }
        if absent && batch.intent == Intent::Revoke {
            return Ok(ExecOutcome::AlreadyAbsent);
        }
        Ok(ExecOutcome::Applied)
    }

    async fn ping(&self, config: &ProviderConfig) -> Result<()> {
        *self.pings.lock().unwrap() += 1;
        if self.behaviour.lock().unwrap().unreachable {
            return Err(Error::connection(config.provider_type(), "connection refused"));
        }
        Ok(())
    }
}
