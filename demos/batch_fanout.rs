//! # Bounded fan-out over a batch
//!
//! Applies one transform to N independent items under a concurrency cap,
//! collecting a result-or-error per item in input order — one poisoned item
//! never aborts the batch.
//!
//! Run with `cargo run --example batch_fanout`.

use std::time::Duration;

use taskweave::module::concurrency_limit;
use taskweave::{Dataset, Module, Neuron, StageError};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt().init();

  let summarize = Neuron::with_limit(
    "summarize",
    concurrency_limit(4),
    |title: String| async move {
      if title.is_empty() {
        return Err(StageError::other("empty title"));
      }
      // Stands in for a completion call against a shared endpoint.
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok(format!("summary of `{title}`"))
    },
  );

  let titles: Dataset<String> = [
    "attention is all you need",
    "",
    "state-space duality",
    "low-rank adaptation",
  ]
  .into_iter()
  .map(str::to_string)
  .collect();

  for (index, result) in summarize.call_batch(titles).await.into_iter().enumerate() {
    match result {
      Ok(summary) => println!("[{index}] {summary}"),
      Err(err) => println!("[{index}] failed: {err}"),
    }
  }
}
