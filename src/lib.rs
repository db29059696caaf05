//! # autosign-rs
//!
//! An automated check-in engine for institutional web portals that expose no
//! public API: logins are negotiated by scraping the portal's historically
//! evolved CAS-style login pages, and the daily chores (attendance sign-in,
//! dormitory checks, collection forms) are driven through a bounded-retry
//! task loop.
//!
//! ## Features
//!
//! - Login handshakes across three known login form generations
//! - Salt-based AES password encryption matching the portal's client script
//! - Text and slider captcha resolution through pluggable backends
//! - Per-identity session sharing across tasks within one run
//! - Bounded-retry task state machine with a layered status taxonomy
//! - Lifecycle hooks and pluggable notification delivery
//!
//! ## Example
//!
//! ```no_run
//! use autosign_rs::{TaskRunner, load_config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("config.yml".as_ref())?;
//!     let mut runner = TaskRunner::builder().build(config)?;
//!     let report = runner.run().await;
//!     println!("{}", report.summary_line());
//!     Ok(())
//! }
//! ```

mod runner;

pub mod actions;
pub mod auth;
pub mod config;
pub mod events;
pub mod notify;
pub mod session;
pub mod task;

pub use crate::runner::{RunReport, TaskRunner, TaskRunnerBuilder};

pub use crate::actions::{ActionError, ActionExecutor, ActionKind, ExecutorSet};

pub use crate::auth::{
    AuthEngine,
    AuthError,
    CaptchaResolver,
    CaptchaVariant,
    FormSchema,
    LoginFormDescriptor,
    OcrBackend,
    SlideSolution,
    SlideSolver,
    encrypt_password,
    scrape_login_form,
};

pub use crate::config::{AppConfig, ConfigError, UserConfig, load_config};

pub use crate::events::{HookDispatcher, LifecycleEvent, LifecycleHook, LifecyclePoint};

pub use crate::notify::{Attachment, LogNotifier, Notifier, NotifyError, RunLog};

pub use crate::session::{IdentityFingerprint, SessionCache, SessionHandle};

pub use crate::task::{SignTask, StatusCode, StatusHead, TaskContext, TimeWindow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
