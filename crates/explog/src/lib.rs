//! explog: a thin integration layer between an application and an
//! experiment-tracking backend.
//!
//! Load configuration once, install the log sink, then run the experiment
//! inside a tracked run:
//!
//! ```no_run
//! use explog::{init_logging, with_run, ConfigProvider, ExperimentLogger, MlflowLogger};
//!
//! fn main() -> explog::Result<()> {
//!     let configs = ConfigProvider::load()?;
//!     init_logging(configs.global_config());
//!
//!     let mut logger = MlflowLogger::new(configs.mlflow_config().clone())?;
//!     with_run(&mut logger, |logger| {
//!         logger.log_experiment_data(&[std::path::PathBuf::from("results/eval.json")])?;
//!         Ok(())
//!     })
//! }
//! ```

pub use explog_core::*;
