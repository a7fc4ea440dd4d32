// balmap/examples/basic_map.rs

use std::time::Duration;

use balmap::{BalancedMap, BalmapError};
use tracing::info;

// A "document" as it moves through the stages.
#[derive(Debug, Clone)]
struct Doc {
  id: u32,
  text: String,
  words: usize,
}

fn main() -> Result<(), BalmapError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Basic Balanced Map Example ---");

  let docs: Vec<Doc> = (0..200)
    .map(|id| Doc {
      id,
      text: String::new(),
      words: 0,
    })
    .collect();

  // 1. `pre` simulates slow IO with many threads, `intra` does the CPU part
  //    with few, `post` formats the result.
  let report = BalancedMap::new(3)
    .pre(8, |mut doc: Doc| {
      std::thread::sleep(Duration::from_millis(10));
      doc.text = "lorem ipsum dolor sit amet ".repeat(doc.id as usize % 7 + 1);
      Ok(doc)
    })
    .intra(2, |mut doc: Doc| {
      doc.words = doc.text.split_whitespace().count();
      Ok(doc)
    })
    .post(1, |mut doc: Doc| {
      doc.text = format!("doc-{}: {} words", doc.id, doc.words);
      Ok(doc)
    })
    .preload(16)
    .collect_results(true)
    .run(docs)?;

  // 2. Results arrive in completion order.
  info!(outcome = ?report.outcome, completed = report.completed, "Run finished.");
  for process in &report.processes {
    info!(
      process = process.process,
      admitted = process.admitted,
      high_water = process.high_water,
      "Worker process summary."
    );
  }

  let mut docs = report.into_results();
  docs.sort_by_key(|d| d.id);
  let total_words: usize = docs.iter().map(|d| d.words).sum();
  info!(first = %docs[0].text, total_words, "Done.");
  Ok(())
}
