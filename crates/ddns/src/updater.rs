//! Periodic dynamic DNS synchronization

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Backoff, DdnsCredentials, Result, UpdateError, UpdateOutcome, UpdateProvider};

/// Updater timing
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Time between successful (or abandoned) updates
    pub interval: Duration,
    /// First retry delay after a transient failure
    pub backoff_initial: Duration,
    /// Retry delay cap
    pub backoff_max: Duration,
    /// Attempts per tick before waiting for the next tick
    pub max_attempts: u32,
    /// How long `stop` waits for the loop to exit before aborting it
    pub stop_grace: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10 * 60),
            backoff_initial: Duration::from_secs(5),
            backoff_max: Duration::from_secs(5 * 60),
            max_attempts: 5,
            stop_grace: Duration::from_secs(2),
        }
    }
}

/// Result of [`DynamicDnsUpdater::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new loop was spawned
    Started,
    /// A loop with the same credentials is already running
    AlreadyRunning,
    /// The running loop switched to the new credentials
    CredentialsUpdated,
}

/// Observable updater state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdaterStatus {
    Idle,
    Running,
    /// Credentials were rejected; waiting for new ones
    HaltedOnAuth,
}

#[derive(Default)]
struct Shared {
    halted: AtomicBool,
    active_loops: AtomicUsize,
    loops_spawned: AtomicUsize,
    attempts: AtomicU64,
    successes: AtomicU64,
}

/// Decrements the active loop count however the loop task ends
struct ActiveLoop(Arc<Shared>);

impl ActiveLoop {
    fn enter(shared: Arc<Shared>) -> Self {
        shared.active_loops.fetch_add(1, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for ActiveLoop {
    fn drop(&mut self) {
        self.0.active_loops.fetch_sub(1, Ordering::SeqCst);
        self.0.halted.store(false, Ordering::SeqCst);
    }
}

struct RunningLoop {
    credentials_tx: watch::Sender<DdnsCredentials>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Background hostname updater
///
/// At most one loop runs per updater. `start` and `stop` are serialized by
/// an internal mutex.
pub struct DynamicDnsUpdater {
    provider: Arc<dyn UpdateProvider>,
    config: UpdaterConfig,
    running: Mutex<Option<RunningLoop>>,
    shared: Arc<Shared>,
}

impl DynamicDnsUpdater {
    pub fn new(provider: Arc<dyn UpdateProvider>) -> Self {
        Self::with_config(provider, UpdaterConfig::default())
    }

    pub fn with_config(provider: Arc<dyn UpdateProvider>, config: UpdaterConfig) -> Self {
        Self {
            provider,
            config,
            running: Mutex::new(None),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Start synchronizing `credentials.hostname`
    ///
    /// Idempotent: never spawns a second loop. New credentials are handed to
    /// the running loop, which also lifts a halt caused by rejected
    /// credentials.
    pub async fn start(&self, credentials: DdnsCredentials) -> Result<StartOutcome> {
        credentials.validate()?;

        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                if *current.credentials_tx.borrow() == credentials {
                    debug!(hostname = %credentials.hostname, "Dynamic DNS updater already running");
                    return Ok(StartOutcome::AlreadyRunning);
                }
                info!(hostname = %credentials.hostname, "Dynamic DNS updater credentials changed");
                current.credentials_tx.send_replace(credentials);
                return Ok(StartOutcome::CredentialsUpdated);
            }
        }

        let (credentials_tx, credentials_rx) = watch::channel(credentials);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shared.loops_spawned.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(run_loop(
            self.provider.clone(),
            self.config.clone(),
            self.shared.clone(),
            credentials_rx,
            shutdown_rx,
        ));

        *running = Some(RunningLoop {
            credentials_tx,
            shutdown_tx,
            handle,
        });
        Ok(StartOutcome::Started)
    }

    /// Cancel the loop
    ///
    /// Returns whether a loop was running. Waits at most `stop_grace` for a
    /// clean exit, then aborts the task. Safe to call when not running.
    pub async fn stop(&self) -> bool {
        let Some(current) = self.running.lock().await.take() else {
            return false;
        };

        let RunningLoop {
            credentials_tx,
            shutdown_tx,
            mut handle,
        } = current;
        let _ = shutdown_tx.send(true);

        if tokio::time::timeout(self.config.stop_grace, &mut handle)
            .await
            .is_err()
        {
            warn!("Dynamic DNS updater did not stop in time, aborting");
            handle.abort();
            let _ = handle.await;
        }

        drop(credentials_tx);
        info!("Dynamic DNS updater stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|current| !current.handle.is_finished())
            .unwrap_or(false)
    }

    pub async fn status(&self) -> UpdaterStatus {
        if !self.is_running().await {
            UpdaterStatus::Idle
        } else if self.shared.halted.load(Ordering::SeqCst) {
            UpdaterStatus::HaltedOnAuth
        } else {
            UpdaterStatus::Running
        }
    }

    /// Credentials of the running loop
    pub async fn credentials(&self) -> Option<DdnsCredentials> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|current| current.credentials_tx.borrow().clone())
    }

    /// Loop tasks currently alive
    pub fn active_loops(&self) -> usize {
        self.shared.active_loops.load(Ordering::SeqCst)
    }

    /// Loop tasks spawned over the updater's lifetime
    pub fn loops_spawned(&self) -> usize {
        self.shared.loops_spawned.load(Ordering::SeqCst)
    }

    /// Update attempts made, retries included
    pub fn attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn successes(&self) -> u64 {
        self.shared.successes.load(Ordering::SeqCst)
    }
}

enum TickOutcome {
    Done,
    Rejected(String),
    GaveUp,
}

enum Wake {
    Tick,
    CredentialsChanged,
    Shutdown,
}

async fn run_loop(
    provider: Arc<dyn UpdateProvider>,
    config: UpdaterConfig,
    shared: Arc<Shared>,
    mut credentials: watch::Receiver<DdnsCredentials>,
    mut shutdown: watch::Receiver<bool>,
) {
    let _active = ActiveLoop::enter(shared.clone());
    info!(hostname = %credentials.borrow().hostname, "Dynamic DNS updater started");

    loop {
        let current = credentials.borrow_and_update().clone();

        let outcome = tokio::select! {
            outcome = update_with_retry(provider.as_ref(), &config, &shared, &current) => outcome,
            changed = credentials.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = shutdown.changed() => break,
        };

        let wait = match outcome {
            TickOutcome::Done | TickOutcome::GaveUp => Some(config.interval),
            TickOutcome::Rejected(reason) => {
                warn!(
                    hostname = %current.hostname,
                    %reason,
                    "Dynamic DNS credentials rejected, halting until they change"
                );
                shared.halted.store(true, Ordering::SeqCst);
                None
            }
        };

        match wait_for(wait, &mut credentials, &mut shutdown).await {
            Wake::Tick => {}
            Wake::CredentialsChanged => shared.halted.store(false, Ordering::SeqCst),
            Wake::Shutdown => break,
        }
    }

    debug!("Dynamic DNS updater loop exited");
}

async fn wait_for(
    delay: Option<Duration>,
    credentials: &mut watch::Receiver<DdnsCredentials>,
    shutdown: &mut watch::Receiver<bool>,
) -> Wake {
    let sleep = async {
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = sleep => Wake::Tick,
        changed = credentials.changed() => {
            if changed.is_ok() {
                Wake::CredentialsChanged
            } else {
                Wake::Shutdown
            }
        }
        _ = shutdown.changed() => Wake::Shutdown,
    }
}

async fn update_with_retry(
    provider: &dyn UpdateProvider,
    config: &UpdaterConfig,
    shared: &Shared,
    credentials: &DdnsCredentials,
) -> TickOutcome {
    let mut backoff = Backoff::new(config.backoff_initial, config.backoff_max);
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        shared.attempts.fetch_add(1, Ordering::SeqCst);

        match provider.update(credentials).await {
            Ok(UpdateOutcome::Updated { address }) => {
                shared.successes.fetch_add(1, Ordering::SeqCst);
                info!(
                    hostname = %credentials.hostname,
                    address = address.as_deref().unwrap_or("unknown"),
                    "Dynamic DNS record updated"
                );
                return TickOutcome::Done;
            }
            Ok(UpdateOutcome::Unchanged) => {
                shared.successes.fetch_add(1, Ordering::SeqCst);
                debug!(hostname = %credentials.hostname, "Dynamic DNS record unchanged");
                return TickOutcome::Done;
            }
            Err(UpdateError::Auth(reason)) => return TickOutcome::Rejected(reason),
            Err(UpdateError::Transient(reason)) => {
                debug!(attempt, %reason, "Dynamic DNS update failed");
                if attempt < max_attempts {
                    tokio::time::sleep(backoff.next_delay()).await;
                }
            }
        }
    }

    warn!(
        hostname = %credentials.hostname,
        attempts = max_attempts,
        "Dynamic DNS update failed, retrying next interval"
    );
    TickOutcome::GaveUp
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::DdnsError;

    /// Provider replaying scripted answers, `Unchanged` once the script ends
    #[derive(Default)]
    struct ScriptedProvider {
        script: StdMutex<VecDeque<std::result::Result<UpdateOutcome, UpdateError>>>,
        rejected_password: StdMutex<Option<String>>,
        hostnames: StdMutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn with_script(
            script: Vec<std::result::Result<UpdateOutcome, UpdateError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into()),
                ..Default::default()
            })
        }

        fn rejecting(password: &str) -> Arc<Self> {
            Arc::new(Self {
                rejected_password: StdMutex::new(Some(password.to_string())),
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.hostnames.lock().unwrap().len()
        }

        fn hostnames(&self) -> Vec<String> {
            self.hostnames.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UpdateProvider for ScriptedProvider {
        async fn update(
            &self,
            credentials: &DdnsCredentials,
        ) -> std::result::Result<UpdateOutcome, UpdateError> {
            self.hostnames
                .lock()
                .unwrap()
                .push(credentials.hostname.clone());
            if self.rejected_password.lock().unwrap().as_deref()
                == Some(credentials.password.expose())
            {
                return Err(UpdateError::Auth("badauth".to_string()));
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(UpdateOutcome::Unchanged))
        }
    }

    fn fast_config() -> UpdaterConfig {
        UpdaterConfig {
            interval: Duration::from_millis(40),
            backoff_initial: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
            max_attempts: 3,
            stop_grace: Duration::from_millis(200),
        }
    }

    fn credentials(hostname: &str, password: &str) -> DdnsCredentials {
        DdnsCredentials::new(hostname, "alice", password)
    }

    #[tokio::test]
    async fn test_double_start_spawns_one_loop() {
        let provider = ScriptedProvider::with_script(vec![]);
        let updater = DynamicDnsUpdater::with_config(provider.clone(), fast_config());

        let first = updater.start(credentials("home.ddns.net", "pw")).await.unwrap();
        let second = updater.start(credentials("home.ddns.net", "pw")).await.unwrap();

        assert_eq!(first, StartOutcome::Started);
        assert_eq!(second, StartOutcome::AlreadyRunning);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(updater.active_loops(), 1);
        assert_eq!(updater.loops_spawned(), 1);
        assert_eq!(updater.status().await, UpdaterStatus::Running);

        updater.stop().await;
    }

    #[tokio::test]
    async fn test_new_credentials_reuse_running_loop() {
        let provider = ScriptedProvider::with_script(vec![]);
        let updater = DynamicDnsUpdater::with_config(provider.clone(), fast_config());

        updater.start(credentials("old.ddns.net", "pw")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let outcome = updater.start(credentials("new.ddns.net", "pw")).await.unwrap();
        assert_eq!(outcome, StartOutcome::CredentialsUpdated);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(updater.loops_spawned(), 1);
        assert_eq!(updater.active_loops(), 1);
        assert_eq!(
            provider.hostnames().last().map(String::as_str),
            Some("new.ddns.net")
        );
        assert_eq!(
            updater.credentials().await.map(|c| c.hostname),
            Some("new.ddns.net".to_string())
        );

        updater.stop().await;
    }

    #[tokio::test]
    async fn test_auth_rejection_halts_until_credentials_change() {
        let provider = ScriptedProvider::rejecting("wrong");
        let updater = DynamicDnsUpdater::with_config(provider.clone(), fast_config());

        updater.start(credentials("home.ddns.net", "wrong")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Several intervals passed but the rejected credentials were tried once
        assert_eq!(provider.calls(), 1);
        assert_eq!(updater.status().await, UpdaterStatus::HaltedOnAuth);

        // Same credentials again do not resume
        let outcome = updater.start(credentials("home.ddns.net", "wrong")).await.unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyRunning);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(provider.calls(), 1);

        updater.start(credentials("home.ddns.net", "right")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(provider.calls() >= 2);
        assert_eq!(updater.status().await, UpdaterStatus::Running);
        assert_eq!(updater.loops_spawned(), 1);

        updater.stop().await;
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let provider = ScriptedProvider::with_script(vec![
            Err(UpdateError::Transient("timeout".to_string())),
            Err(UpdateError::Transient("HTTP 503".to_string())),
            Ok(UpdateOutcome::Updated {
                address: Some("203.0.113.7".to_string()),
            }),
        ]);
        let updater = DynamicDnsUpdater::with_config(provider.clone(), fast_config());

        updater.start(credentials("home.ddns.net", "pw")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(updater.attempts() >= 3);
        assert!(updater.successes() >= 1);
        assert_eq!(updater.status().await, UpdaterStatus::Running);

        updater.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_future_ticks() {
        let provider = ScriptedProvider::with_script(vec![]);
        let updater = DynamicDnsUpdater::with_config(provider.clone(), fast_config());

        updater.start(credentials("home.ddns.net", "pw")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(updater.stop().await);
        assert!(!updater.is_running().await);
        assert_eq!(updater.active_loops(), 0);
        assert_eq!(updater.status().await, UpdaterStatus::Idle);

        let calls = provider.calls();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(provider.calls(), calls);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let updater = DynamicDnsUpdater::with_config(
            ScriptedProvider::with_script(vec![]),
            fast_config(),
        );
        assert!(!updater.stop().await);
        assert_eq!(updater.status().await, UpdaterStatus::Idle);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let provider = ScriptedProvider::with_script(vec![]);
        let updater = DynamicDnsUpdater::with_config(provider.clone(), fast_config());

        updater.start(credentials("home.ddns.net", "pw")).await.unwrap();
        updater.stop().await;
        let outcome = updater.start(credentials("home.ddns.net", "pw")).await.unwrap();

        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(updater.loops_spawned(), 2);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(updater.active_loops(), 1);

        updater.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_credentials_rejected() {
        let updater = DynamicDnsUpdater::with_config(
            ScriptedProvider::with_script(vec![]),
            fast_config(),
        );
        let result = updater.start(credentials("", "pw")).await;
        assert!(matches!(result, Err(DdnsError::InvalidCredentials(_))));
        assert!(!updater.is_running().await);
    }
}
