use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;

use crate::error::StageError;
use crate::label::{Labeled, labeled};
use crate::message::{FlowItem, Payload};
use crate::node::Node;
use crate::pipeline::{Pipeline, Sequential};
use crate::stage::{Stage, on_item, when};

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

async fn wait_until(mut condition: impl FnMut() -> bool) {
  for _ in 0..500 {
    if condition() {
      return;
    }
    sleep(Duration::from_millis(10)).await;
  }
  panic!("condition not met within 5 seconds");
}

#[tokio::test]
async fn sequential_wires_members_in_declaration_order() {
  let double = Node::new("double", |n: u32| async move { Ok(n * 2) });
  let add_ten = Node::new("add_ten", |n: u32| async move { Ok(n + 10) });
  let (sink, seen) = collecting_sink::<u32>("collect");

  let pipeline = Sequential::new(
    "arith",
    vec![Arc::new(double), Arc::new(add_ten), Arc::new(sink)],
  )
  .unwrap();
  pipeline.start();

  for item in 1..=3u32 {
    pipeline.put(item).await.unwrap();
  }
  pipeline.end().await;

  assert!(!pipeline.is_running());
  assert_eq!(*seen.lock().unwrap(), vec![12, 14, 16]);
}

#[tokio::test]
async fn end_drains_every_queued_item() {
  let slow = Node::new("slow", |n: u32| async move {
    sleep(Duration::from_millis(5)).await;
    Ok(n)
  });
  let (sink, seen) = collecting_sink::<u32>("collect");

  let pipeline =
    Sequential::new("drain", vec![Arc::new(slow), Arc::new(sink)]).unwrap();
  pipeline.start();

  for item in 0..20u32 {
    pipeline.put(item).await.unwrap();
  }
  pipeline.end().await;

  assert_eq!(seen.lock().unwrap().len(), 20);
  assert!(!pipeline.is_running());
}

#[tokio::test]
async fn failures_flow_as_values_and_skip_later_stages() {
  let flaky = Node::new("flaky", |n: u32| async move {
    if n == 3 {
      Err(StageError::other("unlucky number"))
    } else {
      Ok(n)
    }
  });

  let downstream_calls = Arc::new(AtomicUsize::new(0));
  let calls = Arc::clone(&downstream_calls);
  let passthrough = Node::new("passthrough", move |n: u32| {
    let calls = Arc::clone(&calls);
    async move {
      calls.fetch_add(1, Ordering::SeqCst);
      Ok(n)
    }
  });

  // Recovers failed items to 0 so the sink sees every lineage.
  let recover = Node::recovering("recover", |payload: Payload<u32>| async move {
    match payload {
      Payload::Item(n) => Ok(n),
      Payload::Failed(_) => Ok(0),
    }
  });
  let (sink, seen) = collecting_sink::<u32>("collect");

  let pipeline = Sequential::new(
    "isolated",
    vec![
      Arc::new(flaky),
      Arc::new(passthrough),
      Arc::new(recover),
      Arc::new(sink),
    ],
  )
  .unwrap();
  pipeline.start();

  for item in 1..=5u32 {
    pipeline.put(item).await.unwrap();
  }
  pipeline.end().await;

  // The failed item bypassed the passthrough stage entirely.
  assert_eq!(downstream_calls.load(Ordering::SeqCst), 4);
  assert_eq!(*seen.lock().unwrap(), vec![1, 2, 0, 4, 5]);
}

#[tokio::test]
async fn a_cycle_forwards_until_the_predicate_rejects() {
  let bump = Node::new("bump", |n: u32| async move { Ok(n + 1) });
  let (sink, seen) = collecting_sink::<u32>("collect");

  // Loop back while under 3; exit (or fall through with a failure) otherwise.
  bump.connect_cycle(&bump, on_item(|n: &u32| *n < 3));
  bump.connect_when(
    &sink,
    when(|payload: &Payload<u32>| payload.item().map_or(true, |n| *n >= 3)),
  );

  sink.start();
  bump.start();

  bump.put(0).await.unwrap();
  wait_until(|| seen.lock().unwrap().len() == 1).await;

  assert_eq!(*seen.lock().unwrap(), vec![3]);
  // Three trips through the node: 0→1, 1→2, 2→3.
  assert_eq!(bump.stats().drain_interval().0, 3);

  bump.end().await;
  wait_until(|| !sink.is_running()).await;
}

#[tokio::test]
async fn a_pipeline_composes_as_a_node() {
  let trim = Node::new("trim", |s: String| async move { Ok(s.trim().to_string()) });
  let lower = Node::new("lower", |s: String| async move { Ok(s.to_lowercase()) });
  let inner = Sequential::new("normalize", vec![Arc::new(trim), Arc::new(lower)]).unwrap();

  let shout = Node::new("shout", |s: String| async move { Ok(format!("{s}!")) });
  let (sink, seen) = collecting_sink::<String>("collect");

  let outer = Sequential::new(
    "outer",
    vec![Arc::new(shout), Arc::new(inner), Arc::new(sink)],
  )
  .unwrap();
  outer.start();

  outer.put("  Hello World  ".to_string()).await.unwrap();
  outer.end().await;

  assert_eq!(*seen.lock().unwrap(), vec!["hello world  !".to_string()]);
}

#[tokio::test]
async fn labels_survive_any_chain_of_labeled_stages() {
  let first = Node::new("first", labeled(|n: u32| async move { Ok(n + 1) }));
  let second = Node::new("second", labeled(|n: u32| async move { Ok(n * 7) }));
  let third = Node::new("third", labeled(|n: u32| async move { Ok(n - 2) }));
  let (sink, seen) = collecting_sink::<Labeled<u32>>("collect");

  let pipeline = Sequential::new(
    "relabel",
    vec![
      Arc::new(first),
      Arc::new(second),
      Arc::new(third),
      Arc::new(sink),
    ],
  )
  .unwrap();
  pipeline.start();

  let input = Labeled::new(5u32);
  let label = input.label().to_string();
  pipeline.put(input).await.unwrap();
  pipeline.end().await;

  let seen = seen.lock().unwrap();
  assert_eq!(seen.len(), 1);
  assert_eq!(seen[0].label(), label, "label is never recomputed");
  assert_eq!(*seen[0].item(), (5 + 1) * 7 - 2);
}

#[tokio::test]
async fn serial_numbers_follow_the_group_hierarchy() {
  let a = Node::new("a", |n: u32| async move { Ok(n) });
  let b = Node::new("b", |n: u32| async move { Ok(n) });
  let inner = Sequential::new("inner", vec![Arc::new(a.clone()), Arc::new(b.clone())]).unwrap();

  let (sink, _) = collecting_sink::<u32>("collect");
  let outer = Sequential::new("outer", vec![Arc::new(inner), Arc::new(sink.clone())]).unwrap();
  outer.start();

  assert_eq!(a.serial(), vec![0, 0]);
  assert_eq!(b.serial(), vec![0, 1]);
  assert_eq!(sink.serial(), vec![1]);

  outer.end().await;
}

#[tokio::test]
async fn criteria_can_be_replaced_before_start() {
  let source = Node::new("source", |n: u32| async move { Ok(n) });
  let (sink, seen) = collecting_sink::<u32>("collect");

  source.connect(&sink);
  source.set_dst_criteria(&sink, on_item(|n: &u32| *n >= 3));

  sink.start();
  source.start();

  for item in 0..5u32 {
    source.put(item).await.unwrap();
  }
  source.end().await;
  wait_until(|| !sink.is_running()).await;

  assert_eq!(*seen.lock().unwrap(), vec![3, 4]);
}

#[tokio::test]
async fn empty_groups_are_rejected() {
  let err = Pipeline::<u32>::new("empty", Vec::new()).unwrap_err();
  assert!(matches!(err, StageError::IllegalArgument { .. }));
}
