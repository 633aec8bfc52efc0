//! Idle scheduler for periodic plugin hooks.
//!
//! Each hook runs at most once per interval. Runs are timed against a
//! wall-clock budget: a hook that exceeds it gets an overrun strike and is
//! disabled once the strikes reach the configured threshold. A hook that
//! fails or panics is disabled on the spot.
//!
//! Worker hooks are spawned and report back through a channel that the
//! scheduler drains at the start of every tick, so a disabled worker hook is
//! removed from the main loop and never by the worker itself.

use std::time::Duration;

use sibyl_framework::handler::run_contained;
use sibyl_framework::{Bot, IdleHook};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Timing limits applied to every idle hook.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub budget: Duration,
    pub max_overruns: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(1),
            max_overruns: 3,
        }
    }
}

struct Slot {
    hook: IdleHook,
    last_run: Option<Instant>,
    overruns: u32,
    running: bool,
}

impl Slot {
    fn is_due(&self, now: Instant) -> bool {
        !self.running
            && self
                .last_run
                .is_none_or(|last| now.duration_since(last) >= self.hook.interval)
    }
}

struct RunReport {
    name: String,
    elapsed: Duration,
    outcome: Result<(), String>,
}

/// What one [`tick`](IdleScheduler::tick) did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Hooks run inline.
    pub ran: usize,
    /// Hooks handed to a worker task.
    pub spawned: usize,
    /// Hooks disabled during this tick.
    pub disabled: Vec<String>,
}

pub struct IdleScheduler {
    settings: SchedulerSettings,
    slots: Vec<Slot>,
    reports_tx: mpsc::UnboundedSender<RunReport>,
    reports_rx: mpsc::UnboundedReceiver<RunReport>,
}

impl IdleScheduler {
    pub fn new(settings: SchedulerSettings, hooks: Vec<IdleHook>) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            slots: hooks
                .into_iter()
                .map(|hook| Slot {
                    hook,
                    last_run: None,
                    overruns: 0,
                    running: false,
                })
                .collect(),
            reports_tx,
            reports_rx,
        }
    }

    /// Names of the hooks still scheduled.
    pub fn hooks(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.hook.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Removes a hook. A worker run already in flight is ignored when it
    /// reports back.
    pub fn deregister(&mut self, name: &str) -> bool {
        let before = self.slots.len();
        self.slots.retain(|s| s.hook.name != name);
        before != self.slots.len()
    }

    /// Collects worker results, then runs every due hook.
    pub async fn tick(&mut self, bot: &Bot) -> TickReport {
        let mut report = TickReport::default();

        while let Ok(run) = self.reports_rx.try_recv() {
            self.judge(run, &mut report);
        }

        let now = Instant::now();
        let due: Vec<usize> = (0..self.slots.len())
            .filter(|&i| self.slots[i].is_due(now))
            .collect();
        let mut inline = Vec::new();
        for i in due {
            let slot = &mut self.slots[i];
            slot.last_run = Some(now);
            let hook = slot.hook.clone();
            if hook.worker {
                slot.running = true;
                report.spawned += 1;
                let tx = self.reports_tx.clone();
                let bot = bot.clone();
                tokio::spawn(async move {
                    let _ = tx.send(run_once(hook, bot).await);
                });
            } else {
                inline.push(hook);
            }
        }

        for hook in inline {
            report.ran += 1;
            let run = run_once(hook, bot.clone()).await;
            self.judge(run, &mut report);
        }
        report
    }

    fn judge(&mut self, run: RunReport, report: &mut TickReport) {
        let Some(idx) = self.slots.iter().position(|s| s.hook.name == run.name) else {
            return;
        };
        let slot = &mut self.slots[idx];
        slot.running = false;

        if let Err(e) = run.outcome {
            error!(hook = %run.name, error = %e, "Idle hook failed, disabled");
            self.remove_at(idx, report);
            return;
        }

        if run.elapsed > self.settings.budget {
            slot.overruns += 1;
            if slot.overruns >= self.settings.max_overruns {
                error!(
                    critical = true,
                    hook = %run.name,
                    elapsed = ?run.elapsed,
                    overruns = slot.overruns,
                    "Idle hook keeps exceeding its time budget, disabled"
                );
                self.remove_at(idx, report);
            } else {
                warn!(
                    hook = %run.name,
                    elapsed = ?run.elapsed,
                    budget = ?self.settings.budget,
                    overruns = slot.overruns,
                    "Idle hook exceeded its time budget"
                );
            }
        } else {
            debug!(hook = %run.name, elapsed = ?run.elapsed, "Idle hook ran");
        }
    }

    fn remove_at(&mut self, idx: usize, report: &mut TickReport) {
        let slot = self.slots.remove(idx);
        report.disabled.push(slot.hook.name);
    }
}

async fn run_once(hook: IdleHook, bot: Bot) -> RunReport {
    let started = Instant::now();
    let outcome = run_contained((hook.func)(bot)).await.map_err(|e| e.to_string());
    RunReport {
        name: hook.name,
        elapsed: started.elapsed(),
        outcome,
    }
}
