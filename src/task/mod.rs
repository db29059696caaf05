//! Task state machine.
//!
//! One [`SignTask`] wraps one user's one action and walks it through a
//! bounded-retry lifecycle. Execution is idempotent: once the status head
//! leaves pending, further invocations are no-ops. The only state that
//! re-enters execution is the fine-grained "failed, awaiting retry" code,
//! which deliberately shares the pending head.

pub mod status;
pub mod window;

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use rand::Rng;

use crate::actions::{ActionError, ExecutorSet};
use crate::auth::{AuthEngine, AuthError};
use crate::config::{ConfigError, UserConfig};
use crate::events::{HookDispatcher, LifecyclePoint};
use crate::notify::{Notifier, RunLog};
use crate::session::{IdentityFingerprint, SessionCache, SessionHandle};

pub use status::{HEAD_COUNT, StatusCode, StatusHead};
pub use window::{TimeWindow, WindowError};

/// Collaborators a task needs for one execution attempt, borrowed from the
/// orchestrator for the duration of the call.
pub struct TaskContext<'a> {
    pub cache: &'a mut SessionCache,
    pub auth: &'a AuthEngine,
    pub executors: &'a ExecutorSet,
    pub hooks: &'a HookDispatcher,
    pub notifier: &'a dyn Notifier,
    pub runlog: &'a RunLog,
}

/// Failure raised during an execution attempt, classified at the task
/// boundary into a status code.
enum TaskFailure {
    Action(ActionError),
    Auth(AuthError),
}

impl From<ActionError> for TaskFailure {
    fn from(err: ActionError) -> Self {
        TaskFailure::Action(err)
    }
}

impl From<AuthError> for TaskFailure {
    fn from(err: AuthError) -> Self {
        TaskFailure::Auth(err)
    }
}

/// One user x one action, driven through up to `max_try` attempts.
pub struct SignTask {
    user: UserConfig,
    fingerprint: IdentityFingerprint,
    max_try: u32,
    attempts: u32,
    code: StatusCode,
    message: String,
}

impl SignTask {
    /// Build a task from user configuration. A task whose execution window
    /// excludes the current time resolves to skipped immediately and never
    /// attempts execution.
    pub fn new(user: UserConfig, max_try: u32) -> Result<Self, ConfigError> {
        let window =
            TimeWindow::parse(&user.task_time_range).map_err(|source| ConfigError::Window {
                username: user.username.clone(),
                expression: user.task_time_range.clone(),
                source,
            })?;
        let fingerprint = IdentityFingerprint::new(&user.school_name, &user.username);

        let (code, message) = if window.contains(&Local::now()) {
            (StatusCode::WAITING, String::new())
        } else {
            let code = StatusCode::OUT_OF_WINDOW;
            (code, code.message().to_string())
        };

        Ok(Self {
            user,
            fingerprint,
            max_try,
            attempts: 0,
            code,
            message,
        })
    }

    pub fn username(&self) -> &str {
        &self.user.username
    }

    pub fn fingerprint(&self) -> &IdentityFingerprint {
        &self.fingerprint
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn head(&self) -> StatusHead {
        self.code.head()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this state is the task's final resolution: a terminal head, or
    /// an exhausted retry budget.
    pub fn is_final(&self) -> bool {
        self.code.is_terminal() || self.attempts >= self.max_try
    }

    /// Run one execution attempt. No-op once the head is no longer pending.
    pub async fn execute(&mut self, ctx: &mut TaskContext<'_>) {
        if self.code.head() != StatusHead::Pending {
            return;
        }
        self.attempts += 1;
        ctx.runlog.note(format!(
            "attempt {} for '{}' ({})",
            self.attempts,
            self.user.username,
            self.user.action.label()
        ));

        match self.attempt(ctx).await {
            Ok(message) => {
                self.code = StatusCode::COMPLETED;
                self.message = message;
            }
            Err(TaskFailure::Action(err)) => {
                if err.code == StatusCode::RETRY_PENDING {
                    // Unclassified failure: keep the full diagnostics.
                    log::error!(
                        "task for '{}' hit an unclassified failure: {:?}",
                        self.user.username,
                        err
                    );
                }
                self.code = err.code;
                self.message = err.message;
            }
            Err(TaskFailure::Auth(err)) => {
                log::error!("login failed for '{}': {:?}", self.user.username, err);
                self.code = StatusCode::RETRY_PENDING;
                self.message = format!("login failed: {err}");
            }
        }

        self.post_step(ctx).await;
    }

    /// Pre-step, action dispatch, and the action itself.
    async fn attempt(&self, ctx: &mut TaskContext<'_>) -> Result<String, TaskFailure> {
        self.random_delay().await;
        ctx.hooks.dispatch(
            LifecyclePoint::TaskStart,
            format!("task for '{}' is about to run", self.user.username),
        );

        let session = self.resolve_session(ctx).await?;
        let executor = ctx.executors.dispatch(self.user.action)?;
        Ok(executor.run(&session, &self.user).await?)
    }

    /// Resolve the session through the cache: reuse on hit, authenticate and
    /// store on miss.
    async fn resolve_session(
        &self,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Arc<SessionHandle>, AuthError> {
        if let Some(handle) = ctx.cache.get(&self.fingerprint) {
            log::debug!("reusing cached session for '{}'", self.user.username);
            return Ok(handle);
        }
        let handle = Arc::new(ctx.auth.login(&self.user).await?);
        ctx.cache.put(self.fingerprint.clone(), handle.clone());
        Ok(handle)
    }

    async fn random_delay(&self) {
        let (min, max) = self.user.delay_range();
        let secs = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        if secs > 0 {
            log::debug!("sleeping {}s before '{}'", secs, self.user.username);
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
    }

    /// Always runs after an attempt: log the state, notify on the final
    /// resolution, fire the task-end hook.
    async fn post_step(&self, ctx: &mut TaskContext<'_>) {
        ctx.runlog
            .note(format!("{} {}", self.format_title(), self.format_message()));

        if self.is_final()
            && let Err(err) = ctx
                .notifier
                .send(&self.format_message(), &self.format_title(), &[])
                .await
        {
            log::warn!("per-task notification failed: {err}");
        }

        ctx.hooks.dispatch(
            LifecyclePoint::TaskEnd,
            format!("task for '{}' finished", self.user.username),
        );
    }

    pub fn format_title(&self) -> String {
        format!(
            "task report ({}) [v{}]",
            self.code.head().label(),
            crate::VERSION
        )
    }

    pub fn format_message(&self) -> String {
        format!(
            "[{}|{}] attempt {}\n>> {}",
            self.user.remark_name,
            self.user.username,
            self.attempts,
            if self.message.is_empty() {
                self.code.message()
            } else {
                self.message.as_str()
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionExecutor, ActionKind};
    use crate::notify::{Attachment, NotifyError};
    use async_trait::async_trait;
    use chrono::Datelike;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn user(time_range: &str) -> UserConfig {
        let mut user: UserConfig = serde_yaml::from_str(
            r#"
username: "20260001"
password: "pw"
school_name: "Example University"
login_url: "https://portal.example.edu/authserver/login"
host: "https://portal.example.edu/"
type: 1
delay: [0, 0]
"#,
        )
        .unwrap();
        user.task_time_range = time_range.to_string();
        user
    }

    struct CountingExecutor {
        calls: AtomicUsize,
        result: Box<dyn Fn() -> Result<String, ActionError> + Send + Sync>,
    }

    impl CountingExecutor {
        fn new(
            result: impl Fn() -> Result<String, ActionError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result: Box::new(result),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ActionExecutor for CountingExecutor {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(
            &self,
            _session: &SessionHandle,
            _user: &UserConfig,
        ) -> Result<String, ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        sends: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn send(
            &self,
            _message: &str,
            _title: &str,
            _attachments: &[Attachment],
        ) -> Result<(), NotifyError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        cache: SessionCache,
        auth: AuthEngine,
        executors: ExecutorSet,
        hooks: HookDispatcher,
        notifier: CountingNotifier,
        runlog: RunLog,
    }

    impl Fixture {
        fn new(executor: Arc<CountingExecutor>) -> Self {
            let mut cache = SessionCache::new();
            // Seed the cache so no network login is ever attempted.
            let fp = IdentityFingerprint::new("Example University", "20260001");
            cache.put(
                fp,
                Arc::new(SessionHandle::new(
                    reqwest::Client::new(),
                    Url::parse("https://portal.example.edu/").unwrap(),
                )),
            );
            Self {
                cache,
                auth: AuthEngine::new(),
                executors: ExecutorSet::default()
                    .with_executor(ActionKind::Attendance, executor),
                hooks: HookDispatcher::new(),
                notifier: CountingNotifier::default(),
                runlog: RunLog::new(),
            }
        }

        fn ctx(&mut self) -> TaskContext<'_> {
            TaskContext {
                cache: &mut self.cache,
                auth: &self.auth,
                executors: &self.executors,
                hooks: &self.hooks,
                notifier: &self.notifier,
                runlog: &self.runlog,
            }
        }
    }

    const ALWAYS: &str = "1-7 1-12 1-31 0-23 0-59";

    /// A window expression that can never contain "now".
    fn closed_window() -> String {
        let other_month = if Local::now().month() == 1 { 2 } else { 1 };
        format!("1-7 {other_month} 1-31 0-23 0-59")
    }

    #[tokio::test]
    async fn out_of_window_task_never_runs_the_executor() {
        let executor = CountingExecutor::new(|| Ok("done".into()));
        let mut fixture = Fixture::new(executor.clone());
        let mut task = SignTask::new(user(&closed_window()), 3).unwrap();

        assert_eq!(task.code(), StatusCode::OUT_OF_WINDOW);
        for _ in 0..3 {
            let mut ctx = fixture.ctx();
            task.execute(&mut ctx).await;
        }
        assert_eq!(executor.calls(), 0);
        assert_eq!(task.attempts(), 0);
        assert_eq!(task.head(), StatusHead::Skipped);
    }

    #[tokio::test]
    async fn second_execute_after_success_is_a_noop() {
        let executor = CountingExecutor::new(|| Ok("submitted".into()));
        let mut fixture = Fixture::new(executor.clone());
        let mut task = SignTask::new(user(ALWAYS), 3).unwrap();

        let mut ctx = fixture.ctx();
        task.execute(&mut ctx).await;
        assert_eq!(task.code(), StatusCode::COMPLETED);
        assert_eq!(task.attempts(), 1);

        let mut ctx = fixture.ctx();
        task.execute(&mut ctx).await;
        assert_eq!(task.attempts(), 1, "terminal task must not re-run");
        assert_eq!(executor.calls(), 1);
        assert_eq!(fixture.notifier.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generic_failures_exhaust_the_retry_budget() {
        let executor = CountingExecutor::new(|| Err(ActionError::retryable("flaky portal")));
        let mut fixture = Fixture::new(executor.clone());
        let max_try = 3;
        let mut task = SignTask::new(user(ALWAYS), max_try).unwrap();

        for _ in 0..max_try {
            let mut ctx = fixture.ctx();
            task.execute(&mut ctx).await;
        }
        assert_eq!(task.attempts(), max_try);
        assert_eq!(executor.calls(), max_try as usize);
        assert_eq!(task.code(), StatusCode::RETRY_PENDING);
        // Only the final attempt notifies.
        assert_eq!(fixture.notifier.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn domain_failures_keep_their_own_code() {
        let executor = CountingExecutor::new(|| Err(ActionError::nothing_to_do("nothing today")));
        let mut fixture = Fixture::new(executor.clone());
        let mut task = SignTask::new(user(ALWAYS), 3).unwrap();

        let mut ctx = fixture.ctx();
        task.execute(&mut ctx).await;
        assert_eq!(task.code(), StatusCode::NOTHING_TO_DO);
        assert_eq!(task.head(), StatusHead::Missing);

        // Terminal: the next round skips it.
        let mut ctx = fixture.ctx();
        task.execute(&mut ctx).await;
        assert_eq!(executor.calls(), 1);
    }
}
