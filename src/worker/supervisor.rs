//! Process supervision (§4.2 "Supervision (ambient detail)"). Worker
//! "processes" are `tokio::process::Command` children running this same
//! binary in `--worker-child` mode — isolation without a second binary.

use std::collections::HashMap;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{interval, sleep};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    pub shutdown_grace_period: Duration,
    /// Liveness-check cadence, independent of `poll_interval` (which governs
    /// each worker's own job-claim polling, passed through as an argument).
    pub liveness_check_interval: Duration,
}

/// Spawns and supervises `config.workers` child processes, each running
/// `binary --worker-child` with the worker pool's tunables forwarded as
/// arguments. Restarts any child that exits — cleanly or not — while
/// shutdown has not been requested (§4.2 step 3).
pub struct Supervisor {
    config: SupervisorConfig,
    binary: std::path::PathBuf,
    extra_args: Vec<String>,
    children: HashMap<usize, Child>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, binary: std::path::PathBuf, extra_args: Vec<String>) -> Self {
        Self { config, binary, extra_args, children: HashMap::new() }
    }

    fn spawn_one(&self, worker_num: usize) -> anyhow::Result<Child> {
        let child = Command::new(&self.binary)
            .arg("--worker-child")
            .args(&self.extra_args)
            .kill_on_drop(true)
            .spawn()?;
        info!(worker_num, pid = child.id(), "spawned worker process");
        Ok(child)
    }

    /// Starts all configured workers, then blocks until `shutdown` resolves,
    /// restarting any child that dies in the meantime. On return, every
    /// child has been signaled and either exited or been killed.
    pub async fn run(mut self, shutdown: impl std::future::Future<Output = ()>) -> anyhow::Result<()> {
        for worker_num in 1..=self.config.workers {
            let child = self.spawn_one(worker_num)?;
            self.children.insert(worker_num, child);
        }

        let mut liveness = interval(self.config.liveness_check_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = liveness.tick() => {
                    self.respawn_dead_children();
                }
                _ = &mut shutdown => {
                    break;
                }
            }
        }

        self.terminate_all().await;
        Ok(())
    }

    fn respawn_dead_children(&mut self) {
        let dead: Vec<usize> = self
            .children
            .iter_mut()
            .filter_map(|(worker_num, child)| match child.try_wait() {
                Ok(Some(status)) => {
                    if status.success() {
                        info!(worker_num, "worker exited cleanly, restarting");
                    } else {
                        warn!(worker_num, ?status, "worker died, restarting");
                    }
                    Some(*worker_num)
                }
                _ => None,
            })
            .collect();

        for worker_num in dead {
            match self.spawn_one(worker_num) {
                Ok(child) => {
                    self.children.insert(worker_num, child);
                }
                Err(e) => warn!(worker_num, error = %e, "failed to respawn worker"),
            }
        }
    }

    /// SIGINT/SIGTERM are forwarded to children by the OS process-group
    /// convention on Unix; here we additionally wait up to the grace period
    /// and hard-kill anything still alive.
    async fn terminate_all(&mut self) {
        let deadline = sleep(self.config.shutdown_grace_period);
        tokio::pin!(deadline);

        loop {
            self.children.retain(|_, child| !matches!(child.try_wait(), Ok(Some(_))));
            if self.children.is_empty() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                _ = &mut deadline => break,
            }
        }

        for (worker_num, child) in self.children.iter_mut() {
            if child.try_wait().ok().flatten().is_none() {
                warn!(worker_num, "worker did not exit within grace period, killing");
                let _ = child.start_kill();
            }
        }
    }
}
