//! Terminal output formatting for search hits and batch summaries.

use crate::model::{BatchIndexResult, SearchHit};
use crate::optimizer::{IndexSuggestion, QueryCost, SearchPlan};
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Print hits as `path:line: symbol (score)` lines, grouped by file.
pub fn print_hits(hits: &[SearchHit], color: bool) -> io::Result<()> {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    let mut stdout = StandardStream::stdout(choice);

    if hits.is_empty() {
        writeln!(stdout, "no results")?;
        return Ok(());
    }

    let mut current_file: Option<&std::path::Path> = None;
    for hit in hits {
        let is_new_file = current_file.map(|p| p != hit.path).unwrap_or(true);
        if is_new_file {
            if current_file.is_some() {
                writeln!(stdout)?;
            }
            stdout.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
            writeln!(stdout, "{}", hit.path.display())?;
            stdout.reset()?;
            current_file = Some(&hit.path);
        }

        write!(stdout, "  ")?;
        if hit.line > 0 {
            stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
            write!(stdout, "{}", hit.line)?;
            stdout.reset()?;
            write!(stdout, ":")?;
        }
        if let Some(ref symbol) = hit.symbol {
            stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
            write!(stdout, "{symbol}")?;
            stdout.reset()?;
        }
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
        writeln!(stdout, "  ({:.2})", hit.score)?;
        stdout.reset()?;
    }

    Ok(())
}

/// Print the chosen plan and its cost estimate (`--explain`).
pub fn print_plan(plan: &SearchPlan, cost: &QueryCost) -> io::Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);

    writeln!(stdout, "plan (format v{}):", plan.version)?;
    for (i, step) in plan.steps.iter().enumerate() {
        writeln!(
            stdout,
            "  step {}: {}{} cost={:.1}",
            i + 1,
            step.engine.as_str(),
            if step.parallel_eligible {
                " [parallel]"
            } else {
                ""
            },
            step.cost.total,
        )?;
    }
    writeln!(
        stdout,
        "estimated: total={:.1} cpu={:.1} io={:.1} mem={:.1} confidence={:.2}{}",
        cost.total,
        cost.cpu,
        cost.io,
        cost.memory,
        cost.confidence,
        if plan.cache_eligible {
            " (cache-eligible)"
        } else {
            ""
        },
    )?;
    Ok(())
}

/// One-line batch summary in the indexer's voice.
pub fn print_batch_summary(batch: &BatchIndexResult) {
    println!(
        "{} files: {} indexed, {} unchanged, {} failed in {:.2}s",
        batch.seen,
        batch.indexed,
        batch.skipped,
        batch.failed,
        batch.elapsed.as_secs_f64(),
    );
    for failure in &batch.failures {
        if let Some(ref error) = failure.error {
            eprintln!("  {}: {}", failure.path.display(), error);
        }
    }
}

/// Print composite-index suggestions.
pub fn print_suggestions(suggestions: &[IndexSuggestion]) -> io::Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);

    if suggestions.is_empty() {
        writeln!(stdout, "no index suggestions")?;
        return Ok(());
    }

    writeln!(stdout, "suggested composite indexes:")?;
    for suggestion in suggestions {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        write!(stdout, "  ({})", suggestion.filters.join(", "))?;
        stdout.reset()?;
        writeln!(
            stdout,
            "  seen {} times, estimated benefit {:.0}",
            suggestion.occurrences, suggestion.benefit,
        )?;
    }
    Ok(())
}
