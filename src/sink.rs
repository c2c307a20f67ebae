//! The ADLS output sink
//!
//! [`AdlsSink`] ties the pieces together. Registration validates the
//! configuration, acquires the first credential and starts renewal. Each
//! [`multi_receive`](AdlsSink::multi_receive) call groups its events by
//! destination and writes every destination under the retry policy, loading
//! the current store handle afresh for each attempt.
//!
//! ```no_run
//! use orbit_adls::auth::AzureAdTokenProvider;
//! use orbit_adls::backend::LocalConnector;
//! use orbit_adls::{AdlsSink, Event, SinkConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> orbit_adls::Result<()> {
//! let config = SinkConfig::from_file("orbit-adls.toml".as_ref())?;
//! let codec = config.build_codec();
//! let sink = AdlsSink::register(
//!     &config,
//!     Arc::new(AzureAdTokenProvider::new()?),
//!     Arc::new(LocalConnector::new("/var/lib/orbit-adls")),
//!     codec,
//! )
//! .await?;
//!
//! let report = sink.multi_receive(vec![Event::from_json_line(r#"{"message":"hi"}"#)?]).await;
//! assert!(report.is_complete());
//! sink.close().await;
//! # Ok(())
//! # }
//! ```

use crate::auth::{CredentialManager, CurrentHandle, RenewalTask, TokenProvider};
use crate::backend::StoreConnector;
use crate::codec::Codec;
use crate::config::SinkConfig;
use crate::core::retry::{self, Escalation, ProcessExit, RetryPolicy};
use crate::core::{writer, Batcher, CorrelationIds, DeliveryReport, PathReport};
use crate::error::Result;
use crate::event::Event;
use crate::template::Template;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

pub struct AdlsSink {
    batcher: Batcher,
    correlation: CorrelationIds,
    policy: RetryPolicy,
    permission: u32,
    escalation: Arc<dyn Escalation>,
    current: CurrentHandle,
    renewal: RenewalTask,
}

impl AdlsSink {
    /// Validate `config`, acquire the first credential and start renewal
    ///
    /// # Errors
    ///
    /// Configuration errors are reported before any token request is made.
    /// A failed first acquisition is returned as `AdlsError::Auth`.
    pub async fn register(
        config: &SinkConfig,
        provider: Arc<dyn TokenProvider>,
        connector: Arc<dyn StoreConnector>,
        codec: Arc<dyn Codec>,
    ) -> Result<Self> {
        config.validate()?;
        let permission = config.permission_bits()?;
        let batcher = Batcher::new(
            Template::parse(&config.path),
            config.line_separator.as_bytes(),
            config.single_file_per_thread,
            codec,
        )?;

        let manager = CredentialManager::new(config.credential_settings(), provider, connector);
        let renewal = manager.start().await?;
        let correlation = CorrelationIds::new();

        info!(
            fqdn = %config.adls_fqdn,
            path = %config.path,
            single_file_per_thread = config.single_file_per_thread,
            instance = correlation.instance(),
            "ADLS output registered"
        );

        Ok(Self {
            batcher,
            correlation,
            policy: config.retry_policy(),
            permission,
            escalation: Arc::new(ProcessExit),
            current: renewal.current().clone(),
            renewal,
        })
    }

    /// Replace the action taken when retries are exhausted
    pub fn with_escalation(mut self, escalation: Arc<dyn Escalation>) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn current_handle(&self) -> &CurrentHandle {
        &self.current
    }

    pub fn correlation_ids(&self) -> &CorrelationIds {
        &self.correlation
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver a group of events
    ///
    /// Safe to call from many workers at once. Never fails: destinations
    /// that exhaust their retries are dropped and show up in the report as
    /// not written.
    pub async fn multi_receive(&self, events: Vec<Event>) -> DeliveryReport {
        let started = Instant::now();
        // Held until every destination of this call is flushed
        let lease = self.correlation.lease();
        let batch = self.batcher.group(events, lease.id());
        let skipped_events = batch.skipped();

        let mut paths = Vec::with_capacity(batch.len());
        for (path, data, count) in batch.into_entries() {
            let permission = self.permission;
            let current = &self.current;
            let target = path.as_str();

            let outcome = retry::execute(target, &self.policy, self.escalation.as_ref(), || {
                let handle = current.load();
                let data = data.clone();
                async move { writer::write(handle.store(), target, &data, permission).await }
            })
            .await;

            paths.push(PathReport {
                bytes: data.len(),
                events: count,
                attempts: outcome.attempts(),
                written: outcome.is_written(),
                path,
            });
        }

        let report = DeliveryReport {
            paths,
            skipped_events,
            duration: started.elapsed(),
        };
        debug!(
            events = report.events_written(),
            discarded = report.events_discarded(),
            skipped = report.skipped_events,
            paths = report.paths.len(),
            elapsed_ms = report.duration.as_millis() as u64,
            cid = lease.id(),
            "Flushed batch"
        );
        report
    }

    /// Stop credential renewal
    ///
    /// Writes already running on other workers keep their handle.
    pub async fn close(self) {
        info!("Shutting down ADLS output");
        self.renewal.shutdown().await;
        info!("ADLS output closed");
    }
}
