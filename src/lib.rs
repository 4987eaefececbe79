//! # TaskWeave
//!
//! Concurrent dataflow pipeline execution on Tokio: bounded queues, fixed
//! worker pools, predicate-gated routing — cycles included — and per-item
//! failure isolation.
//!
//! ## Core pieces
//!
//! - **[`Node`](node::Node)**: one stage — an async function behind a
//!   bounded input queue, run by a fixed pool of workers, fanning out along
//!   predicate-gated edges. A full queue suspends producers (backpressure);
//!   a failing item becomes a value flowing downstream instead of a crash.
//! - **[`NodeGroup`](group::NodeGroup) / [`Pipeline`](pipeline::Pipeline) /
//!   [`Sequential`](pipeline::Sequential)**: group-wide lifecycle and
//!   head/tail composition, so whole pipelines nest inside bigger pipelines
//!   like single nodes.
//! - **[`Module`](module::Module) / [`Neuron`](module::Neuron) /
//!   [`Dataset`](dataset::Dataset)**: apply one transform to N independent
//!   items under a shared concurrency cap, collecting per-item
//!   result-or-error without aborting the batch.
//! - **[`Monitor`](monitor::Monitor) /
//!   [`PipelineAnalyser`](monitor::PipelineAnalyser)**: periodic per-node
//!   reports (queue depth, in-flight, throughput) emitted from a dedicated
//!   OS thread so telemetry survives a saturated runtime.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use taskweave::{Node, Sequential, Stage};
//!
//! let tokenize = Node::new("tokenize", |text: String| async move { Ok(text.to_lowercase()) });
//! let sink = Node::sink("collect", |text: String| async move {
//!     tracing::info!(%text, "done");
//!     Ok(())
//! });
//! let pipeline = Sequential::new("normalize", vec![Arc::new(tokenize), Arc::new(sink)])?;
//! pipeline.start();
//! pipeline.put("Hello".to_string()).await?;
//! pipeline.end().await;
//! ```

#![deny(missing_docs)]

/// Engine-wide configuration defaults, loadable from JSON.
pub mod config;
/// Batch normalization for the fan-out executor.
pub mod dataset;
/// Error taxonomy and error-as-value failure records.
pub mod error;
/// Composable groups of stages.
pub mod group;
/// Content-hash identity labels surviving cyclic re-entry.
pub mod label;
/// The tagged payload flowing along edges.
pub mod message;
/// Bounded fan-out batch execution.
pub mod module;
/// Periodic telemetry reporting.
pub mod monitor;
/// The processing unit: queue + worker pool + edges.
pub mod node;
/// Pipelines and linear auto-wiring.
pub mod pipeline;
/// The shared lifecycle and wiring contract.
pub mod stage;
/// Per-node execution counters.
pub mod stats;

pub use config::EngineConfig;
pub use dataset::Dataset;
pub use error::{BoxError, StageError, StageFailure};
pub use group::NodeGroup;
pub use label::{Labeled, labeled};
pub use message::{FlowItem, Payload};
pub use module::{Module, Neuron};
pub use monitor::{Analyser, Monitor, PipelineAnalyser};
pub use node::{DeliveryMode, Node, NodeConfig};
pub use pipeline::{Pipeline, Sequential};
pub use stage::{Predicate, Stage, always, on_item, when};

#[cfg(test)]
mod monitor_test;
#[cfg(test)]
mod pipeline_test;
