//! # Bounded refinement (cyclic dataflow)
//!
//! A three-stage survey loop: `digest` summarizes a draft, `polish` cleans it
//! up and routes it back into `digest` until the draft reaches its round
//! limit, then hands it to the `assemble` sink. The cycle-back edge is wired
//! with [`connect_cycle`](taskweave::Stage::connect_cycle) so drain detection
//! ignores it; the predicate owns termination.
//!
//! A [`Monitor`](taskweave::Monitor) reports per-node queue depth, in-flight
//! work and throughput from its own OS thread while the loop runs.
//!
//! Run with `cargo run --example bounded_refinement`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskweave::{
  Analyser, Monitor, Node, Payload, Pipeline, PipelineAnalyser, Stage, on_item, when,
};

const ROUND_LIMIT: u32 = 3;

#[derive(Debug, Clone)]
struct Draft {
  topic: String,
  round: u32,
  sections: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
  tracing_subscriber::fmt().init();

  let digest = Node::new("digest", |mut draft: Draft| async move {
    draft.round += 1;
    draft
      .sections
      .push(format!("notes from round {}", draft.round));
    Ok(draft)
  });
  let polish = Node::new("polish", |mut draft: Draft| async move {
    draft.sections.sort();
    draft.sections.dedup();
    Ok(draft)
  });

  let assembled = Arc::new(Mutex::new(Vec::new()));
  let sink_out = Arc::clone(&assembled);
  let assemble = Node::sink("assemble", move |draft: Draft| {
    let out = Arc::clone(&sink_out);
    async move {
      out.lock().unwrap().push(draft);
      Ok(())
    }
  });

  digest.connect(&polish);
  polish.connect_cycle(&digest, on_item(|draft: &Draft| draft.round < ROUND_LIMIT));
  polish.connect_when(
    &assemble,
    when(|payload: &Payload<Draft>| {
      payload.item().map_or(true, |draft| draft.round >= ROUND_LIMIT)
    }),
  );

  let survey = Pipeline::with_bounds(
    "survey",
    vec![Arc::new(digest), Arc::new(polish), Arc::new(assemble)],
    0,
    2,
  )?;

  let analyser = Arc::new(PipelineAnalyser::new());
  analyser.register(&survey);
  let monitor = Monitor::new(Duration::from_secs(1));
  monitor.register(Arc::clone(&analyser) as Arc<dyn Analyser>);

  survey.start();
  monitor.start();
  for topic in [
    "sparse attention",
    "state-space models",
    "speculative decoding",
  ] {
    survey
      .put(Draft {
        topic: topic.to_string(),
        round: 0,
        sections: Vec::new(),
      })
      .await?;
  }
  survey.end().await;
  monitor.stop();

  for draft in assembled.lock().unwrap().iter() {
    println!(
      "{}: {} rounds, {} sections",
      draft.topic,
      draft.round,
      draft.sections.len()
    );
  }
  Ok(())
}
