//! `rqa search` and `rqa ask`: the read side from the command line.
//!
//! `search` prints raw similarity hits. `ask` runs the full query workflow
//! and prints the answer followed by its sources and stage timings.

use anyhow::{bail, Result};

use repo_qa_core::models::{MetadataFilter, ScoredChunk};

use crate::config::Config;
use crate::service::QaService;
use crate::workflow::{Outcome, QueryResult};

const EXCERPT_CHARS: usize = 160;

pub async fn run_search(config: &Config, query: &str, k: Option<usize>, json: bool) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let service = QaService::build(config.clone()).await?;
    let k = k.unwrap_or(config.retrieval.top_k);
    let results = service
        .indexer
        .search(query, k, &MetadataFilter::new())
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    print_hits(&results);
    Ok(())
}

pub async fn run_ask(config: &Config, query: &str, json: bool) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let service = QaService::build(config.clone()).await?;
    if !service.is_indexed() {
        bail!("the repository has not been indexed yet; run `rqa index` first");
    }
    let result = service.workflow.run(query, Vec::new()).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    print_answer(&result);
    Ok(())
}

fn print_hits(results: &[ScoredChunk]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for (i, hit) in results.iter().enumerate() {
        let meta = &hit.chunk.metadata;
        println!("{}. [{:.3}] {}", i + 1, hit.score, meta.source);
        println!("    url: {}", meta.locator);
        if let Some(date) = meta.last_modified {
            println!("    updated: {}", date.format("%Y-%m-%d"));
        }
        println!("    excerpt: \"{}\"", excerpt(&hit.chunk.text));
        println!();
    }
}

fn print_answer(result: &QueryResult) {
    println!("{}", result.answer.trim_end());
    println!();

    match result.outcome {
        Outcome::Answered if !result.context.is_empty() => {
            println!("Sources:");
            for hit in &result.context {
                println!("  [{:.3}] {}", hit.score, hit.chunk.metadata.locator);
            }
            println!();
        }
        Outcome::Failed => {
            if let Some(err) = &result.error {
                eprintln!("error: {}", err);
            }
        }
        _ => {}
    }

    let timings: Vec<String> = result
        .processing_time
        .iter()
        .map(|(label, d)| format!("{}={:.3}s", label, d.as_secs_f64()))
        .collect();
    println!("Timings: {}", timings.join(" "));
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{cut}...")
}
