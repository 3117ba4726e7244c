//! # Trueno-Trainer: Resumable Training Orchestrator
//!
//! **Version**: 0.1.0
//!
//! Trueno-Trainer drives an opaque numerical model through a long-running,
//! resumable sequence of training iterations. A background thread prefetches
//! the next batch through a single-slot channel while the current step runs;
//! a schedule table fires learning-rate changes, validation, checkpoints and
//! user callbacks at exact iterations; every iteration is recorded in a run
//! store so an interrupted or diverged run can be resumed without lost or
//! duplicated iterations.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Just-in-Time**: one batch prepared ahead, never more (capacity-1 channel)
//! - **Jidoka**: NaN loss stops the line immediately, before any bad row is written
//! - **Poka-Yoke**: invalid schedules are rejected at registration, not mid-run
//! - **Genchi Genbutsu**: every iteration's loss, duration and source are recorded
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use trueno_trainer::batch::{Batch, Tensor};
//! use trueno_trainer::experiment::MemoryRunStore;
//! use trueno_trainer::model::{LossTensor, TrainableModel};
//! use trueno_trainer::prefetch::{BatchSource, StopToken};
//! use trueno_trainer::trainer::{LoopState, Trainer};
//! use trueno_trainer::Result;
//!
//! struct Halving(f32);
//!
//! impl TrainableModel for Halving {
//!     fn step_train(&mut self, _: &Tensor, _: &Tensor, _: f64) -> Result<LossTensor> {
//!         self.0 /= 2.0;
//!         Ok(vec![self.0])
//!     }
//!     fn step_validate(&mut self, _: &Tensor, _: &Tensor) -> Result<LossTensor> {
//!         Ok(vec![self.0])
//!     }
//!     fn save_checkpoint(&mut self, _: u64) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! struct Zeros;
//!
//! impl BatchSource for Zeros {
//!     fn next_batch(&mut self, _: &StopToken) -> Result<Batch> {
//!         Ok(Batch::new(Tensor::from_vec(vec![0.0]), Tensor::from_vec(vec![0.0]), "zeros"))
//!     }
//! }
//!
//! let store = Arc::new(MemoryRunStore::new());
//! let mut trainer = Trainer::builder("demo", Halving(1.0), Zeros, store.clone()).build()?;
//!
//! let outcome = trainer.fit(Some(9))?;
//! assert_eq!(outcome.state, LoopState::Stopped);
//! assert_eq!(outcome.completed, Some(9));
//! assert_eq!(store.metrics_for_run("demo").len(), 10);
//! # Ok::<(), trueno_trainer::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod batch;
pub mod channel;
pub mod config;
pub mod error;
pub mod experiment;
pub mod model;
pub mod prefetch;
pub mod recorder;
pub mod recovery;
pub mod schedule;
pub mod trainer;

pub use error::{Error, Result};
