//! Control-loop driver
//!
//! Feeds one unit agent from three sources: lifecycle events read as JSON
//! lines, a periodic update-status trigger, and a poll of the retry queue.
//! Every outcome is written back as one JSON line.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, info, warn};

use shoal_backup::InMemoryBackupAgent;
use shoal_control::{EventOutcome, LifecycleEvent, UnitAgent, UnitAgentBuilder};
use shoal_engine::SimulatedEngine;
use shoal_health::Boundary;
use shoal_tls::MockCertificateAuthority;
use shoal_topology::{InMemoryTopologyStore, TopologyStore};
use shoal_types::UnitId;

use crate::config::{DaemonConfig, DriverConfig};
use crate::error::{DaemonError, DaemonResult};

pub struct Driver {
    agent: UnitAgent,
    store: InMemoryTopologyStore,
    config: DriverConfig,
}

impl Driver {
    /// Wire an agent against in-process collaborators.
    pub fn new(config: &DaemonConfig) -> DaemonResult<Self> {
        let store = InMemoryTopologyStore::new();
        let agent = UnitAgentBuilder::new(
            UnitId::new(config.unit.name.clone()),
            config.unit.address.clone(),
        )
        .with_store(Arc::new(store.clone()))
        .with_engine(Arc::new(SimulatedEngine::new()))
        .with_certificate_authority(Arc::new(MockCertificateAuthority::new()))
        .with_backup_agent(Arc::new(InMemoryBackupAgent::new(
            config.reconfig.replica_set_name.clone(),
        )))
        .with_reconfig_config(config.reconfig.clone())
        .with_provision_config(config.provision.clone())
        .with_tls_config(config.tls.clone())
        .with_retry_queue_config(config.retries.clone())
        .with_guard_config(Boundary::Engine, config.guards.engine.clone())
        .with_guard_config(
            Boundary::CertificateAuthority,
            config.guards.certificate_authority.clone(),
        )
        .with_guard_config(Boundary::ObjectStorage, config.guards.object_storage.clone())
        .build()?;

        Ok(Self {
            agent,
            store,
            config: config.driver.clone(),
        })
    }

    pub fn agent(&self) -> &UnitAgent {
        &self.agent
    }

    /// Handle one event. A leader-elected signal takes the lease first.
    pub async fn apply(&self, event: LifecycleEvent) -> DaemonResult<EventOutcome> {
        if matches!(event, LifecycleEvent::LeaderElected) {
            let lease = self.store.acquire_lease(self.agent.unit()).await?;
            info!(unit = %lease.holder, epoch = lease.epoch, "Leadership acquired");
        }
        let name = event.name();
        let outcome = self.agent.handle(event).await;
        debug!(event = %name, status = %self.agent.status().message(), "Event applied");
        Ok(outcome)
    }

    /// Decode and handle one input line. Blank lines are skipped.
    pub async fn apply_line(&self, line: &str) -> DaemonResult<Option<EventOutcome>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let event: LifecycleEvent = serde_json::from_str(line)?;
        self.apply(event).await.map(Some)
    }

    /// Run until the input closes or `shutdown` resolves.
    pub async fn run<R, W, S>(&self, input: R, mut output: W, shutdown: S) -> DaemonResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        let mut lines = input.lines();
        tokio::pin!(shutdown);

        let started = self.apply(LifecycleEvent::Start).await?;
        write_outcome(&mut output, &started).await?;

        let status_period = Duration::from_secs(self.config.update_status_interval_secs.max(1));
        let retry_period = Duration::from_secs(self.config.retry_poll_interval_secs.max(1));
        let mut status_tick = interval_at(Instant::now() + status_period, status_period);
        let mut retry_tick = interval_at(Instant::now() + retry_period, retry_period);

        info!(unit = %self.agent.unit(), "Control loop started");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("Event stream closed");
                        break;
                    };
                    match self.apply_line(&line).await {
                        Ok(Some(outcome)) => write_outcome(&mut output, &outcome).await?,
                        Ok(None) => {}
                        Err(DaemonError::Decode(e)) => {
                            warn!(error = %e, "Skipping malformed event");
                        }
                        Err(e) => return Err(e),
                    }
                }
                _ = status_tick.tick() => {
                    let outcome = self.apply(LifecycleEvent::UpdateStatus).await?;
                    write_outcome(&mut output, &outcome).await?;
                }
                _ = retry_tick.tick() => {
                    for outcome in self.agent.process_retries(Utc::now()).await {
                        write_outcome(&mut output, &outcome).await?;
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        info!(
            unit = %self.agent.unit(),
            pending = self.agent.pending_retries(),
            "Control loop stopped"
        );
        Ok(())
    }
}

async fn write_outcome<W: AsyncWrite + Unpin>(
    output: &mut W,
    outcome: &EventOutcome,
) -> DaemonResult<()> {
    let mut line = serde_json::to_vec(outcome)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn driver() -> Driver {
        Driver::new(&DaemonConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_blank_and_malformed_lines() {
        let driver = driver();
        assert!(driver.apply_line("   ").await.unwrap().is_none());
        assert!(matches!(
            driver.apply_line("{\"event\":\"reboot\"}").await,
            Err(DaemonError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_leader_elected_takes_the_lease() {
        let driver = driver();
        let outcome = driver
            .apply_line(r#"{"event":"leader-elected"}"#)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_handled());
        let lease = driver.store.current_lease().await.unwrap().unwrap();
        assert_eq!(&lease.holder, driver.agent().unit());
    }

    #[tokio::test]
    async fn test_run_answers_each_line() {
        let driver = driver();
        let input = tokio_test::io::Builder::new()
            .read(b"{\"event\":\"leader-elected\"}\n")
            .read(b"not json\n")
            .read(b"{\"event\":\"action\",\"action\":\"get-primary\"}\n")
            .build();
        let mut output = Vec::new();
        driver
            .run(BufReader::new(input), &mut output, std::future::pending())
            .await
            .unwrap();

        let outcomes: Vec<EventOutcome> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_handled());
        assert!(outcomes[1].is_handled());
        match &outcomes[2] {
            EventOutcome::Action(Ok(response)) => {
                assert_eq!(response.get("replica-set-primary"), Some("shoal/0"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
