use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;

use crate::error::StageError;
use crate::message::FlowItem;
use crate::monitor::{Analyser, Monitor, PipelineAnalyser};
use crate::node::Node;
use crate::pipeline::Sequential;
use crate::stage::Stage;

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

fn arithmetic_pipeline(sink_name: &str) -> (Sequential<u32>, Arc<Mutex<Vec<u32>>>) {
  let double = Node::new("double", |n: u32| async move { Ok(n * 2) });
  let add_one = Node::new("add_one", |n: u32| async move { Ok(n + 1) });
  let (sink, seen) = collecting_sink::<u32>(sink_name);
  let pipeline = Sequential::new(
    "arith",
    vec![Arc::new(double), Arc::new(add_one), Arc::new(sink)],
  )
  .unwrap();
  (pipeline, seen)
}

#[tokio::test]
async fn the_report_has_one_row_per_node() {
  let (pipeline, _) = arithmetic_pipeline("collect");
  let analyser = PipelineAnalyser::new();
  analyser.register(&pipeline);
  pipeline.start();

  for item in 0..5u32 {
    pipeline.put(item).await.unwrap();
  }
  pipeline.end().await;

  let report = analyser.report();
  assert!(report.contains("Pipeline Report"));
  assert!(report.contains("Serial"));
  assert!(report.contains("Avg Speed"));
  assert!(report.contains("double"));
  assert!(report.contains("add_one"));
  assert!(report.contains("collect"));
  assert!(report.contains("Finished"));
  assert!(report.contains("0/1"), "drained queues read 0/capacity");
}

#[tokio::test]
async fn attaching_an_analyser_does_not_change_the_output() {
  let (watched, watched_seen) = arithmetic_pipeline("watched");
  let analyser = PipelineAnalyser::new();
  analyser.register(&watched);
  analyser.start();

  let (plain, plain_seen) = arithmetic_pipeline("plain");

  watched.start();
  plain.start();
  for item in 0..10u32 {
    watched.put(item).await.unwrap();
    plain.put(item).await.unwrap();
  }
  watched.end().await;
  plain.end().await;

  assert_eq!(*watched_seen.lock().unwrap(), *plain_seen.lock().unwrap());
}

#[tokio::test]
async fn interval_counters_fold_into_lifetime_totals() {
  let (pipeline, _) = arithmetic_pipeline("collect");
  let analyser = PipelineAnalyser::new();
  analyser.register(&pipeline);
  pipeline.start();

  for item in 0..4u32 {
    pipeline.put(item).await.unwrap();
  }
  pipeline.end().await;

  // First report drains the interval window; the second shows no interval
  // activity but keeps the lifetime average.
  let first = analyser.report();
  assert!(first.contains("4/"), "four invocations in the first window");
  let second = analyser.report();
  // Skip the title, header and separator lines.
  let speed_columns: Vec<&str> = second
    .lines()
    .skip(3)
    .filter_map(|line| line.split_whitespace().nth(5))
    .collect();
  assert_eq!(speed_columns.len(), 3);
  assert!(speed_columns.iter().all(|cell| cell.starts_with("n/a")));
}

struct CountingAnalyser {
  started: AtomicUsize,
  reported: AtomicUsize,
}

impl Analyser for CountingAnalyser {
  fn start(&self) {
    self.started.fetch_add(1, Ordering::SeqCst);
  }

  fn report(&self) -> String {
    self.reported.fetch_add(1, Ordering::SeqCst);
    "counting".to_string()
  }
}

#[tokio::test]
async fn the_monitor_reports_on_its_own_thread() {
  tracing_subscriber::fmt().with_test_writer().try_init().ok();
  let analyser = Arc::new(CountingAnalyser {
    started: AtomicUsize::new(0),
    reported: AtomicUsize::new(0),
  });
  let monitor = Monitor::new(Duration::from_millis(100));
  monitor.register(Arc::clone(&analyser) as Arc<dyn Analyser>);
  monitor.start();

  // The reporter runs on an OS thread, so it keeps its cadence even while
  // this test only sleeps on the async runtime.
  sleep(Duration::from_millis(400)).await;
  monitor.stop();

  assert_eq!(analyser.started.load(Ordering::SeqCst), 1);
  assert!(analyser.reported.load(Ordering::SeqCst) >= 1);
}
