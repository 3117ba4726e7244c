//! Synthetic Training: interrupt, inspect, resume
//!
//! Fits `y = 3x + 1` with plain SGD on random batches while a timer thread
//! plays the operator pressing Ctrl-C. The recovery controller pauses the
//! run, reports its state, raises the limit and continues without losing or
//! repeating an iteration.
//!
//! Run with: RUST_LOG=info cargo run --example synthetic_training

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;
use trueno_trainer::batch::{Batch, Tensor};
use trueno_trainer::config::TrainerConfig;
use trueno_trainer::experiment::MemoryRunStore;
use trueno_trainer::model::{LossTensor, TrainableModel};
use trueno_trainer::prefetch::{BatchSource, StopToken};
use trueno_trainer::recovery::{CommandOutcome, OperatorCommand, RecoveryController};
use trueno_trainer::schedule::builtin::{FoldBatch, ValidationSource};
use trueno_trainer::schedule::LoopHandle;
use trueno_trainer::trainer::Trainer;

const BATCH_SIZE: usize = 32;

/// `y = w·x + b`, squared-error loss per sample.
struct Linear {
    weight: f32,
    bias: f32,
}

impl Linear {
    fn losses(&self, input: &Tensor, target: &Tensor) -> (LossTensor, f32, f32) {
        let mut losses = Vec::with_capacity(input.len());
        let (mut grad_w, mut grad_b) = (0.0, 0.0);
        for (x, y) in input.data().iter().zip(target.data()) {
            let error = self.weight.mul_add(*x, self.bias) - y;
            losses.push(error * error);
            grad_w += 2.0 * error * x;
            grad_b += 2.0 * error;
        }
        let n = input.len().max(1) as f32;
        (losses, grad_w / n, grad_b / n)
    }
}

impl TrainableModel for Linear {
    fn step_train(
        &mut self,
        input: &Tensor,
        target: &Tensor,
        learning_rate: f64,
    ) -> trueno_trainer::Result<LossTensor> {
        let (losses, grad_w, grad_b) = self.losses(input, target);
        let rate = learning_rate as f32;
        self.weight -= rate * grad_w;
        self.bias -= rate * grad_b;
        Ok(losses)
    }

    fn step_validate(
        &mut self,
        input: &Tensor,
        target: &Tensor,
    ) -> trueno_trainer::Result<LossTensor> {
        Ok(self.losses(input, target).0)
    }

    fn save_checkpoint(&mut self, iteration: u64) -> trueno_trainer::Result<()> {
        println!(
            "  [checkpoint] iteration {iteration}: w = {:.4}, b = {:.4}",
            self.weight, self.bias
        );
        Ok(())
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({"name": "linear", "parameters": 2})
    }
}

/// Random points on the target line with a little noise.
struct LinePoints {
    rng: StdRng,
    produced: u64,
}

impl LinePoints {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            produced: 0,
        }
    }

    fn sample(rng: &mut StdRng) -> (Vec<f32>, Vec<f32>) {
        (0..BATCH_SIZE)
            .map(|_| {
                let x: f32 = rng.gen_range(-1.0..1.0);
                let noise: f32 = rng.gen_range(-0.05..0.05);
                (x, 3.0f32.mul_add(x, 1.0) + noise)
            })
            .unzip()
    }
}

impl BatchSource for LinePoints {
    fn next_batch(&mut self, stop: &StopToken) -> trueno_trainer::Result<Batch> {
        let (x, y) = Self::sample(&mut self.rng);
        self.produced += 1;
        // Slow the source down so the demo runs long enough to interrupt.
        if stop.sleep(Duration::from_micros(200)) {
            return Err(trueno_trainer::Error::Interrupted);
        }
        Ok(Batch::new(
            Tensor::from_vec(x),
            Tensor::from_vec(y),
            format!("line-{}", self.produced),
        ))
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({"name": "line_points", "batch_size": BATCH_SIZE})
    }
}

struct HeldOut(StdRng);

impl ValidationSource for HeldOut {
    fn validation_batches(&mut self) -> trueno_trainer::Result<Vec<FoldBatch>> {
        let (x, y) = LinePoints::sample(&mut self.0);
        Ok(vec![FoldBatch::new(
            "held_out",
            Batch::new(Tensor::from_vec(x), Tensor::from_vec(y), "held_out"),
        )])
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== Trueno-Trainer: Synthetic Training ===\n");

    let config = TrainerConfig::builder()
        .iteration_limit(100_000)
        .learning_rates([(0, 0.1), (500, 0.01)])
        .validation_period(250)
        .checkpoint_period(500)
        .build();
    let store = Arc::new(MemoryRunStore::new());
    let trainer = Trainer::builder(
        "synthetic_line",
        Linear {
            weight: 0.0,
            bias: 0.0,
        },
        LinePoints::new(42),
        store.clone(),
    )
    .config(config)
    .validation_source(HeldOut(StdRng::seed_from_u64(7)))
    .every(200, |handle: &mut LoopHandle<'_>| -> trueno_trainer::Result<()> {
        println!(
            "  iteration {:>5}: best cost {:.5}",
            handle.iteration(),
            handle.run().best_cost()
        );
        Ok(())
    })
    .build()?;

    let mut controller = RecoveryController::new(trainer);
    let interrupt = controller.trainer().interrupt_handle();
    let operator = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        println!("\n  ^C (operator interrupt)\n");
        interrupt.raise();
    });

    println!("Phase 1: training towards iteration 100000 (will be interrupted)");
    let outcome = controller.train(controller.limit())?;
    operator
        .join()
        .map_err(|_| anyhow::anyhow!("operator thread panicked"))?;
    println!(
        "  loop ended: {} at iteration {}",
        outcome.state, outcome.iteration
    );

    println!("\nPhase 2: operator session");
    for line in ["i", "se 2999 c", "i"] {
        println!("  > {line}");
        let commands = OperatorCommand::parse_many(line)?;
        for outcome in controller.apply_all(commands)? {
            match outcome {
                CommandOutcome::Snapshot(snapshot) => {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                }
                CommandOutcome::Trained(outcome) => {
                    println!(
                        "  loop ended: {} at iteration {}",
                        outcome.state, outcome.iteration
                    );
                }
                other => println!("  {other:?}"),
            }
        }
    }

    let rows = store.metrics_for_run("synthetic_line");
    let contiguous = rows
        .iter()
        .zip(0u64..)
        .all(|(row, expected)| row.iteration() == expected);
    println!("\n=== Summary ===");
    println!("  metric rows:        {}", rows.len());
    println!("  contiguous 0..=N:   {contiguous}");
    println!(
        "  validation rows:    {}",
        store.validations_for_run("synthetic_line").len()
    );
    if let Some(document) = store.run_document("synthetic_line") {
        println!("  learning rates:     {}", document["learning_rates"]);
        println!("  status:             {}", document["status"]);
    }

    Ok(())
}
