//! High level run orchestration.
//!
//! Owns the task list and drives the bounded-retry loop: up to `max_try`
//! rounds over every task, per-identity session eviction as tasks resolve,
//! per-head status aggregation, and the run-level notification with the
//! captured run log attached. Rounds never short-circuit; resolved tasks cost
//! O(1) per round through the idempotence rule.

use std::sync::Arc;

use chrono::Local;
use rand::seq::SliceRandom;

use crate::actions::ExecutorSet;
use crate::auth::AuthEngine;
use crate::config::{AppConfig, ConfigError};
use crate::events::{HookDispatcher, LifecycleHook, LifecyclePoint, LoggingHook};
use crate::notify::{LogNotifier, Notifier, RunLog};
use crate::session::SessionCache;
use crate::task::{HEAD_COUNT, SignTask, StatusHead, TaskContext};

/// Per-head task counts aggregated after the final round.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub counts: [usize; HEAD_COUNT],
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn done(&self) -> usize {
        self.counts[StatusHead::Done.index()]
    }

    /// Tasks that were not skipped outright.
    pub fn executed(&self) -> usize {
        self.total() - self.counts[StatusHead::Skipped.index()]
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} task(s) | {} pending, {} done, {} skipped, {} error, {} missing",
            self.total(),
            self.counts[StatusHead::Pending.index()],
            self.counts[StatusHead::Done.index()],
            self.counts[StatusHead::Skipped.index()],
            self.counts[StatusHead::Error.index()],
            self.counts[StatusHead::Missing.index()],
        )
    }
}

/// Fluent builder for [`TaskRunner`].
pub struct TaskRunnerBuilder {
    auth: AuthEngine,
    executors: ExecutorSet,
    notifier: Arc<dyn Notifier>,
    hooks: HookDispatcher,
}

impl TaskRunnerBuilder {
    pub fn new() -> Self {
        let mut hooks = HookDispatcher::new();
        hooks.register_handler(Arc::new(LoggingHook));
        Self {
            auth: AuthEngine::new(),
            executors: ExecutorSet::default(),
            notifier: Arc::new(LogNotifier),
            hooks,
        }
    }

    pub fn with_auth_engine(mut self, auth: AuthEngine) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_executor_set(mut self, executors: ExecutorSet) -> Self {
        self.executors = executors;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn register_hook(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.hooks.register_handler(hook);
        self
    }

    /// Build the runner and its task list from configuration. Any malformed
    /// user entry aborts here, before anything executes.
    pub fn build(self, config: AppConfig) -> Result<TaskRunner, ConfigError> {
        let mut users = config.users.clone();
        if config.shuffle_tasks {
            log::debug!("shuffling task order");
            users.shuffle(&mut rand::thread_rng());
        }
        let tasks = users
            .into_iter()
            .map(|user| SignTask::new(user, config.max_try))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TaskRunner {
            max_try: config.max_try,
            tasks,
            cache: SessionCache::new(),
            auth: self.auth,
            executors: self.executors,
            hooks: self.hooks,
            notifier: self.notifier,
            runlog: RunLog::new(),
        })
    }
}

impl Default for TaskRunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Main orchestrator: owns the tasks, the session cache, and the reporting
/// hooks for one run.
pub struct TaskRunner {
    max_try: u32,
    tasks: Vec<SignTask>,
    cache: SessionCache,
    auth: AuthEngine,
    executors: ExecutorSet,
    hooks: HookDispatcher,
    notifier: Arc<dyn Notifier>,
    runlog: RunLog,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("max_try", &self.max_try)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl TaskRunner {
    pub fn builder() -> TaskRunnerBuilder {
        TaskRunnerBuilder::new()
    }

    pub fn tasks(&self) -> &[SignTask] {
        &self.tasks
    }

    /// Drive every task through the full round budget and report.
    pub async fn run(&mut self) -> RunReport {
        let started = Local::now();
        self.hooks
            .dispatch(LifecyclePoint::RunStart, "task sequence is about to run");
        self.runlog
            .note(format!("run started with {} task(s)", self.tasks.len()));

        for round in 1..=self.max_try {
            self.runlog.note(format!("round {}/{}", round, self.max_try));
            for idx in 0..self.tasks.len() {
                {
                    let Self {
                        tasks,
                        cache,
                        auth,
                        executors,
                        hooks,
                        notifier,
                        runlog,
                        ..
                    } = self;
                    let mut ctx = TaskContext {
                        cache,
                        auth,
                        executors,
                        hooks,
                        notifier: notifier.as_ref(),
                        runlog,
                    };
                    tasks[idx].execute(&mut ctx).await;
                }

                // Bounded memory: drop the session as soon as no pending task
                // shares this identity.
                let fingerprint = self.tasks[idx].fingerprint().clone();
                let still_needed = self.tasks.iter().any(|task| {
                    task.head() == StatusHead::Pending && *task.fingerprint() == fingerprint
                });
                if !still_needed {
                    self.cache.evict(&fingerprint);
                }
            }
            // Sessions never outlive the round that produced them.
            self.cache.clear();
        }

        let report = self.report();
        self.runlog.note(report.summary_line());

        let title = format!(
            "run report ({}/{}) [v{}]",
            report.done(),
            report.executed(),
            crate::VERSION
        );
        let body = self.format_run_message(&report, started);
        if let Err(err) = self
            .notifier
            .send(&body, &title, &[self.runlog.attachment()])
            .await
        {
            log::warn!("run-level notification failed: {err}");
        }

        self.hooks
            .dispatch(LifecyclePoint::RunEnd, "task sequence finished");
        report
    }

    fn report(&self) -> RunReport {
        let mut counts = [0usize; HEAD_COUNT];
        for task in &self.tasks {
            counts[task.head().index()] += 1;
        }
        RunReport { counts }
    }

    fn format_run_message(&self, report: &RunReport, started: chrono::DateTime<Local>) -> String {
        let mut lines: Vec<String> = self
            .tasks
            .iter()
            .filter(|task| task.head() != StatusHead::Skipped)
            .map(SignTask::format_message)
            .collect();
        let elapsed = (Local::now() - started).num_seconds();
        lines.push(format!(
            "started {}, took {}s",
            started.format("%Y-%m-%d %H:%M:%S"),
            elapsed
        ));
        lines.push(report.summary_line());
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Attachment, NotifyError};
    use async_trait::async_trait;
    use chrono::Datelike;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sends: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(
            &self,
            message: &str,
            title: &str,
            attachments: &[Attachment],
        ) -> Result<(), NotifyError> {
            self.sends.lock().unwrap().push((
                message.to_string(),
                title.to_string(),
                attachments.len(),
            ));
            Ok(())
        }
    }

    fn closed_window_config(users: usize) -> AppConfig {
        let other_month = if Local::now().month() == 1 { 2 } else { 1 };
        let window = format!("1-7 {other_month} 1-31 0-23 0-59");
        let entries: String = (0..users)
            .map(|i| {
                format!(
                    r#"
  - username: "2026000{i}"
    password: "pw"
    school_name: "Example University"
    login_url: "https://portal.example.edu/authserver/login"
    host: "https://portal.example.edu/"
    type: 1
    task_time_range: "{window}"
"#
                )
            })
            .collect();
        serde_yaml::from_str(&format!("max_try: 3\nusers:{entries}")).unwrap()
    }

    #[tokio::test]
    async fn skipped_tasks_aggregate_and_notify_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut runner = TaskRunner::builder()
            .with_notifier(notifier.clone())
            .build(closed_window_config(2))
            .unwrap();

        let report = runner.run().await;
        assert_eq!(report.total(), 2);
        assert_eq!(report.counts[StatusHead::Skipped.index()], 2);
        assert_eq!(report.executed(), 0);
        assert!(runner.tasks().iter().all(|task| task.attempts() == 0));

        let sends = notifier.sends.lock().unwrap();
        assert_eq!(sends.len(), 1, "exactly one run-level notification");
        let (_, title, attachments) = &sends[0];
        assert!(title.starts_with("run report (0/0)"));
        assert_eq!(*attachments, 1, "run log attached");
    }

    #[test]
    fn malformed_window_fails_the_build() {
        let mut config = closed_window_config(1);
        config.users[0].task_time_range = "not a window".to_string();
        let err = TaskRunner::builder().build(config).expect_err("fatal");
        assert!(matches!(err, ConfigError::Window { .. }));
    }
}
