//! Corpus statistics for `rqa stats`.
//!
//! Prints what is indexed: document and chunk counts, when the corpus was
//! last built, and which store and models are in use.

use anyhow::Result;

use repo_qa_core::models::CorpusStats;

use crate::config::Config;
use crate::service::QaService;

/// Run the stats command: open the index and print a summary.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let service = QaService::build(config.clone()).await?;
    let stats = service.indexer.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let embedder = service.indexer.index_handle().embedder();

    println!("Repo QA: Corpus Stats");
    println!("=====================");
    println!();
    println!("  Repository:  {}", config.repository.display_name());
    if let Some(url) = &config.repository.url {
        println!("  URL:         {} ({})", url, config.repository.branch);
    }
    println!("  Store:       {}", describe_store(&stats));
    if stats.persistent {
        println!("  Size:        {}", format_bytes(db_size));
    }
    println!();
    println!("  Documents:   {}", stats.document_count);
    println!("  Chunks:      {}", stats.chunk_count);
    if let Some(dims) = stats.vector_dims {
        println!("  Dimensions:  {}", dims);
    }
    println!(
        "  Indexed:     {}",
        stats
            .last_indexed
            .map(|t| format_ts_relative(t.timestamp()))
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "  Embeddings:  {} ({} dims)",
        embedder.model_name(),
        embedder.dims()
    );
    println!(
        "  Chunking:    {} chars, {} overlap",
        config.chunking.chunk_size, config.chunking.chunk_overlap
    );
    if let Some(err) = &stats.error {
        println!();
        println!("  Warning: {}", err);
    }
    println!();

    Ok(())
}

fn describe_store(stats: &CorpusStats) -> String {
    match (&stats.location, stats.persistent) {
        (Some(loc), true) => format!("sqlite ({})", loc),
        _ => "in-memory (not persisted)".to_string(),
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now, e.g. "3 hours ago".
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, plural(mins))
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, plural(hours))
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, plural(days))
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_scale_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn relative_times() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }

    #[test]
    fn memory_store_is_described_as_such() {
        let stats = CorpusStats::default();
        assert_eq!(describe_store(&stats), "in-memory (not persisted)");
    }
}
