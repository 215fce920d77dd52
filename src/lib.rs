//! # fitness-input
//!
//! A Splunk modular input that polls fitness-tracking APIs on behalf of every
//! stored user credential and streams the fetched records to the host.
//!
//! ## Modules
//!
//! - [`modinput`]: host XML configuration, validation and scheme
//! - [`credentials`]: app and user OAuth credentials from the secure store
//! - [`checkpoint`]: per-instance, per-credential resume timestamps
//! - [`providers`]: provider enum, fetch strategies and the strategy table
//! - [`orchestrator`]: the polling run tying the above together
//! - [`output`]: JSON-lines event sink
//! - [`config`]: connector settings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fitness_input::config::Config;
//! use fitness_input::credentials::SplunkPasswordStore;
//! use fitness_input::modinput::InputConfig;
//! use fitness_input::orchestrator::IngestionOrchestrator;
//! use fitness_input::output::JsonLinesSink;
//! use fitness_input::providers::StaticRegistry;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default().config;
//!     let input = InputConfig::read_from(std::io::stdin())?;
//!
//!     let orchestrator = IngestionOrchestrator::new(
//!         SplunkPasswordStore::new(&config.splunk),
//!         StaticRegistry,
//!         &config,
//!     );
//!
//!     let mut sink = JsonLinesSink::new(std::io::stdout());
//!     let report = orchestrator.run(&input, &mut sink).await?;
//!     println!("{} credentials failed", report.failure_count());
//!
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod credentials;
pub mod modinput;
pub mod orchestrator;
pub mod output;
pub mod providers;

pub use orchestrator::{IngestionOrchestrator, RunError, RunReport};
pub use providers::{Provider, StaticRegistry};
