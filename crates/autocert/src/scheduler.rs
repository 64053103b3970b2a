//! Background certificate renewal
//!
//! Periodically re-requests every cached identifier set so expiring
//! certificates are renewed before a handshake has to wait for them.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::acme::AcmeClient;
use crate::manager::Manager;

/// Minimum check interval
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Delay before the first check
const INITIAL_DELAY: Duration = Duration::from_secs(10);

/// Outcome of one renewal pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalReport {
    /// Identifier sets checked
    pub checked: usize,
    /// Sets whose certificate changed serial during the pass
    pub renewed: usize,
    /// Sets that failed to resolve
    pub failed: usize,
}

/// Background renewal loop over a [`Manager`]'s cache
///
/// Renewal itself is the manager's ordinary issuance path, so a pass running
/// alongside handshakes for the same names joins their in-flight orders
/// instead of placing duplicates.
pub struct RenewalScheduler<C: AcmeClient> {
    /// Manager whose cache is swept
    manager: Manager<C>,
    /// Time between passes
    check_interval: Duration,
    /// Wait before the first pass
    initial_delay: Duration,
}

impl<C: AcmeClient> RenewalScheduler<C> {
    /// Scheduler checking at the manager's recommended interval
    ///
    /// # Arguments
    ///
    /// * `manager` - Manager to renew through; usually a clone of the one
    ///   serving handshakes
    pub fn new(manager: Manager<C>) -> Self {
        let check_interval = manager.check_every().max(MIN_CHECK_INTERVAL);
        Self {
            manager,
            check_interval,
            initial_delay: INITIAL_DELAY,
        }
    }

    /// Override the check interval, clamped to at least one minute
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Run forever, checking at the configured interval
    pub async fn run(self) {
        info!(
            check_interval_secs = self.check_interval.as_secs(),
            "Starting certificate renewal scheduler"
        );

        // Initial check after a short delay
        tokio::time::sleep(self.initial_delay).await;

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            debug!("Running scheduled certificate renewal check");
            self.check_renewals().await;
        }
    }

    /// One pass over every cached identifier set; failures are logged, not returned
    pub async fn check_renewals(&self) -> RenewalReport {
        let start = Instant::now();
        let mut report = RenewalReport::default();

        let sets = match self.manager.cached_identifier_sets() {
            Ok(sets) => sets,
            Err(e) => {
                error!(error = %e, "Failed to list cached certificates");
                return report;
            }
        };

        info!(certificate_count = sets.len(), "Checking certificates for renewal");

        for identifiers in sets {
            let Some((primary, alternates)) = identifiers.split_first() else {
                continue;
            };
            report.checked += 1;

            // Compare raw entries to tell a renewal from a cache hit
            let fingerprint = Manager::<C>::fingerprint(&identifiers);
            let before = self
                .manager
                .cache_fetch(&fingerprint)
                .ok()
                .flatten();

            match self
                .manager
                .managed_certificate(primary, alternates, Utc::now())
                .await
            {
                Ok(cert) => {
                    let after = self.manager.cache_fetch(&fingerprint).ok().flatten();
                    if before != after {
                        report.renewed += 1;
                        info!(
                            identifiers = ?identifiers,
                            serial = %cert.serial(),
                            valid_to = %cert.valid_to(),
                            "Certificate renewed"
                        );
                    } else {
                        debug!(identifiers = ?identifiers, "Certificate is still valid");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(identifiers = ?identifiers, error = %e, "Certificate renewal failed");
                }
            }
        }

        info!(
            checked = report.checked,
            renewed = report.renewed,
            failed = report.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Certificate renewal check complete"
        );
        report
    }
}

impl<C: AcmeClient> std::fmt::Debug for RenewalScheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("check_interval", &self.check_interval)
            .field("initial_delay", &self.initial_delay)
            .finish()
    }
}
