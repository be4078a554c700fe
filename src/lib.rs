//! Safe consumption of credentials that an external agent renders onto a
//! shared volume and rotates on its own schedule.
//!
//! ```no_run
//! use credwatch::config::ResolvedConfig;
//! use credwatch::CredentialService;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = ResolvedConfig::load(std::path::Path::new("credwatch.toml"))?;
//! let service = CredentialService::from_config(&config)?;
//!
//! let cancel = CancellationToken::new();
//! let watchers = service.spawn(cancel.clone());
//! service.wait_ready(&cancel).await;
//!
//! let redis = service.get_credential("redis-password")?;
//! let _password = redis.value();
//!
//! watchers.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod readiness;
pub mod rotation;
pub mod service;
pub mod staleness;
pub mod subscription;
pub mod watcher;

pub use credentials::{Credential, CredentialFormat, CredentialStore};
pub use error::{Error, Result, ValidationError};
pub use readiness::{ReadinessGate, ReadinessState};
pub use rotation::{RotationCoordinator, RotationOutcome};
pub use service::{CredentialService, StatusReport, WatchHandle};
pub use subscription::{RotationEvent, Subscription};
pub use watcher::{ChangeEvent, CredentialWatcher};
