use cidx_indexer::SlotTracker;
use cidx_protocol::ProgressEvent;
use cidx_query::QueryResult;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Streamed-progress renderer for daemon-backed runs: status lines plus a
/// single counting bar driven by `(current, total)` events.
pub struct EventDisplay {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl EventDisplay {
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }

    pub fn handle(&mut self, event: &ProgressEvent) {
        if event.is_status() {
            if !self.quiet {
                eprintln!("{}", event.info);
            }
            return;
        }
        if self.quiet {
            return;
        }
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(event.total);
            bar.set_style(
                ProgressStyle::with_template(
                    "{bar:30.cyan/blue} {pos}/{len} {msg}",
                )
                .expect("valid progress template"),
            );
            bar
        });
        bar.set_length(event.total);
        bar.set_position(event.current);
        bar.set_message(format!("{} | {}", event.file_path, event.info));
    }

    pub fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Per-slot display for in-process indexing: one bar per tracker slot,
/// refreshed from copy-on-read snapshots. The bar count always equals the
/// worker count, so the display never claims more parallelism than exists.
pub struct SlotDisplay {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl SlotDisplay {
    #[must_use]
    pub fn start(tracker: Arc<SlotTracker>) -> Self {
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();
        let handle = tokio::spawn(async move {
            let multi = MultiProgress::new();
            let bars: Vec<ProgressBar> = (0..tracker.max_slots())
                .map(|_| {
                    let bar = multi.add(ProgressBar::new_spinner());
                    bar.set_style(
                        ProgressStyle::with_template("{spinner} {msg}")
                            .expect("valid slot template"),
                    );
                    bar
                })
                .collect();

            let mut ticker = tokio::time::interval(Duration::from_millis(100));
            loop {
                tokio::select! {
                    () = cancel_task.cancelled() => break,
                    _ = ticker.tick() => {
                        for (bar, slot) in bars.iter().zip(tracker.snapshot()) {
                            match slot {
                                Some(info) => bar.set_message(format!(
                                    "{} [{}]{}",
                                    info.label,
                                    info.status.as_str(),
                                    info.detail
                                        .map(|d| format!(" {d}"))
                                        .unwrap_or_default()
                                )),
                                None => bar.set_message("idle".to_string()),
                            }
                            bar.tick();
                        }
                    }
                }
            }
            for bar in bars {
                bar.finish_and_clear();
            }
        });
        Self { cancel, handle }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Render query results. Every display mode, quiet included, prefixes each
/// match with its 1-based number.
pub fn print_results(results: &[QueryResult], quiet: bool) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }
    for (index, result) in results.iter().enumerate() {
        let number = index + 1;
        let line_start = result.payload.get_u64("line_start").unwrap_or(0);
        let line_end = result.payload.get_u64("line_end").unwrap_or(0);
        let location = if line_start > 0 {
            format!("{}:{}-{}", result.path, line_start, line_end)
        } else {
            result.path.clone()
        };

        if quiet {
            println!("{number}. {location}");
            continue;
        }

        println!(
            "{number}. {} {}",
            style(&location).bold(),
            style(format!("(score {:.3})", result.score)).dim()
        );
        if let Some(preview) = result
            .payload
            .get_str("content_preview")
            .or_else(|| result.payload.get_str("content"))
            .or_else(|| result.payload.get_str("code_snippet_preview"))
            .or_else(|| result.payload.get_str("code_snippet"))
        {
            for line in preview.lines().take(3) {
                println!("   {line}");
            }
        }
        if let Some(commit) = result.payload.get_str("commit_hash") {
            let date = result.payload.get_str("commit_date").unwrap_or_default();
            println!("   {}", style(format!("commit {commit} {date}")).dim());
        }
    }
}

/// Format result lines for tests and machine consumption; mirrors
/// `print_results` numbering.
#[must_use]
pub fn format_result_lines(results: &[QueryResult]) -> Vec<String> {
    results
        .iter()
        .enumerate()
        .map(|(index, result)| format!("{}. {}", index + 1, result.path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cidx_query::QueryResult;
    use pretty_assertions::assert_eq;

    fn result(path: &str, score: f32) -> QueryResult {
        let mut payload = cidx_query::Payload::new();
        payload.insert("path", path);
        QueryResult {
            path: path.to_string(),
            score,
            payload,
        }
    }

    #[test]
    fn match_numbers_are_one_based_in_every_mode() {
        let results = vec![result("a.rs", 0.9), result("b.rs", 0.8)];
        let lines = format_result_lines(&results);
        assert_eq!(lines, vec!["1. a.rs".to_string(), "2. b.rs".to_string()]);
    }
}
