//! End-to-end pipeline behavior through the public API: cyclic refinement,
//! broadcast failure routing, and telemetry attachment.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskweave::{
  Analyser, FlowItem, Monitor, Node, Payload, Pipeline, PipelineAnalyser, Stage, StageError,
  on_item, when,
};

fn collecting_sink<T: FlowItem>(name: &str) -> (Node<T>, Arc<Mutex<Vec<T>>>) {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink_seen = Arc::clone(&seen);
  let node = Node::sink(name, move |item: T| {
    let seen = Arc::clone(&sink_seen);
    async move {
      seen.lock().unwrap().push(item);
      Ok::<(), StageError>(())
    }
  });
  (node, seen)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Draft {
  topic: String,
  round: u32,
  sections: Vec<String>,
}

impl Draft {
  fn new(topic: &str) -> Self {
    Self {
      topic: topic.to_string(),
      round: 0,
      sections: Vec::new(),
    }
  }
}

#[tokio::test]
async fn a_cyclic_refinement_pipeline_drains_cleanly() {
  let outline = Node::new("outline", |mut draft: Draft| async move {
    draft.sections.push("overview".to_string());
    Ok(draft)
  });
  let digest = Node::new("digest", |mut draft: Draft| async move {
    draft.round += 1;
    draft.sections.push(format!("digest-{}", draft.round));
    Ok(draft)
  });
  let refine = Node::new("refine", |mut draft: Draft| async move {
    draft.sections.sort();
    draft.sections.dedup();
    Ok(draft)
  });
  let (assemble, assembled) = collecting_sink::<Draft>("assemble");

  outline.connect(&digest);
  digest.connect(&refine);
  refine.connect_cycle(&digest, on_item(|draft: &Draft| draft.round < 3));
  refine.connect_when(
    &assemble,
    when(|payload: &Payload<Draft>| payload.item().map_or(true, |draft| draft.round >= 3)),
  );

  let survey = Pipeline::with_bounds(
    "survey",
    vec![
      Arc::new(outline),
      Arc::new(digest),
      Arc::new(refine),
      Arc::new(assemble),
    ],
    0,
    3,
  )
  .unwrap();

  let analyser = Arc::new(PipelineAnalyser::new());
  analyser.register(&survey);
  let monitor = Monitor::new(Duration::from_millis(50));
  monitor.register(Arc::clone(&analyser) as Arc<dyn Analyser>);
  monitor.start();

  survey.start();
  for topic in ["transformers", "diffusion", "retrieval"] {
    survey.put(Draft::new(topic)).await.unwrap();
  }
  survey.end().await;
  monitor.stop();

  let assembled = assembled.lock().unwrap();
  assert_eq!(assembled.len(), 3);
  for draft in assembled.iter() {
    assert_eq!(draft.round, 3, "every draft leaves after its third round");
    assert!(draft.sections.contains(&"digest-3".to_string()));
    assert!(draft.sections.contains(&"overview".to_string()));
  }

  let report = analyser.report();
  assert!(report.contains("digest"));
  assert!(report.contains("refine"));
  assert!(report.contains("Finished"));
}

#[tokio::test]
async fn failures_broadcast_to_a_recovery_branch() {
  let parse = Node::new("parse", |line: String| async move {
    if line.contains("corrupt") {
      Err(StageError::other(format!("cannot parse `{line}`")))
    } else {
      Ok(line.to_uppercase())
    }
  });

  let caught = Arc::new(Mutex::new(Vec::new()));
  let catch_log = Arc::clone(&caught);
  let catch = Node::recovering("catch", move |payload: Payload<String>| {
    let caught = Arc::clone(&catch_log);
    async move {
      match payload {
        Payload::Item(line) => Ok(line),
        Payload::Failed(failure) => {
          caught.lock().unwrap().push(failure.stage.clone());
          Ok("FALLBACK".to_string())
        }
      }
    }
  });
  let (store, stored) = collecting_sink::<String>("store");

  // Live items go straight to the store; failures branch into the catcher,
  // which feeds its recoveries back into the same store.
  parse.connect_when(&store, on_item(|_: &String| true));
  parse.connect_when(&catch, when(Payload::is_failed));
  catch.connect(&store);

  let ingest = Pipeline::with_bounds(
    "ingest",
    vec![Arc::new(parse), Arc::new(catch), Arc::new(store)],
    0,
    2,
  )
  .unwrap();
  ingest.start();

  for line in ["alpha", "corrupt beta", "gamma"] {
    ingest.put(line.to_string()).await.unwrap();
  }
  ingest.end().await;

  assert_eq!(*caught.lock().unwrap(), vec!["parse".to_string()]);
  let mut stored = stored.lock().unwrap().clone();
  stored.sort();
  assert_eq!(stored, vec!["ALPHA", "FALLBACK", "GAMMA"]);
}
