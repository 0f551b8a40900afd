use crate::app::Workspace;
use crate::app::dto::*;
use crate::domain::change::ChangeSet;
use crate::domain::history::ExecutionResult;
use crate::domain::selector::TestSelection;
use anyhow::{Context as _, Result};
use serde::Serialize;
use std::io::Read;
use std::path::Path;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn build_graph(ws: &mut Workspace, json: bool) -> Result<()> {
    let res = ws.build_graph()?;
    if json {
        return print_json(&res);
    }
    println!("Graph Summary:");
    println!("  Files:           {}", res.stats.files);
    println!("  Elements:        {}", res.stats.elements);
    println!("  Edges:           {}", res.stats.edges);
    println!("  Heuristic edges: {}", res.stats.heuristic_edges);
    println!("  Tests:           {}", res.stats.tests);
    if !res.parse_failures.is_empty() {
        println!("\nParse failures ({}):", res.parse_failures.len());
        for path in &res.parse_failures {
            println!("  {path}");
        }
    }
    Ok(())
}

pub fn detect_changes(ws: &mut Workspace, paths: &[String], json: bool) -> Result<()> {
    ws.load_graph()?;
    let mut all = Vec::with_capacity(paths.len());
    for path in paths {
        all.push(ws.detect_changes(path)?);
    }
    if json {
        return print_json(&all);
    }
    for changes in &all {
        print_change_set(changes);
    }
    Ok(())
}

fn print_change_set(changes: &ChangeSet) {
    if changes.skipped {
        println!("{}: unchanged", changes.path);
        return;
    }
    let note = match (changes.parse_failed, changes.had_prior_state) {
        (true, _) => " (parse failed)",
        (false, false) => " (no prior snapshot)",
        _ => "",
    };
    println!("{}{}", changes.path, note);
    for id in &changes.added {
        println!("  + {id}");
    }
    for id in &changes.modified {
        println!("  ~ {id}");
    }
    for id in &changes.deleted {
        println!("  - {id}");
        if let Some(callers) = changes.former_dependents.get(id) {
            for caller in callers {
                println!("      was called by {caller}");
            }
        }
    }
}

pub fn neighbors(ws: &mut Workspace, id: &str, reverse: bool, json: bool) -> Result<()> {
    ws.load_graph()?;
    let res = if reverse {
        ws.dependents(id)?
    } else {
        ws.dependencies(id)?
    };
    if json {
        return print_json(&res);
    }
    let label = if reverse { "Dependents" } else { "Dependencies" };
    println!("{label} of {} ({}):", res.id, res.elements.len());
    for el in &res.elements {
        println!("  {el}");
    }
    Ok(())
}

pub fn test_impact(
    ws: &mut Workspace,
    ids: &[String],
    max_depth: Option<usize>,
    json: bool,
) -> Result<()> {
    ws.load_graph()?;
    let res = ws.test_impact(&ImpactRequest {
        ids: ids.to_vec(),
        max_depth,
    });
    if json {
        return print_json(&res);
    }
    println!("Impacted elements ({}):", res.impacted.len());
    for id in &res.impacted {
        println!("  {id}");
    }
    println!("\nAttached tests ({}):", res.tests.len());
    for t in &res.tests {
        println!("  {}  >>> {}", t.test_id, t.assertion_text);
    }
    Ok(())
}

pub fn select(ws: &mut Workspace, req: SelectRequest, json: bool) -> Result<()> {
    ws.load_graph()?;
    let selection = ws.select(&req);
    if json {
        return print_json(&selection);
    }
    print_selection(&selection);
    Ok(())
}

pub fn affected(ws: &mut Workspace, req: AffectedRequest, json: bool) -> Result<()> {
    ws.load_graph()?;
    let res = ws.affected(&req)?;
    if json {
        return print_json(&res);
    }
    if res.changes.is_empty() {
        println!("No changed elements.");
    }
    for changes in &res.changes {
        print_change_set(changes);
    }
    println!();
    print_selection(&res.selection);
    Ok(())
}

fn print_selection(selection: &TestSelection) {
    println!(
        "Selected {} of {} tests (skipped {}), confidence {:.2}{}",
        selection.selected_count,
        selection.total_count,
        selection.skipped_count,
        selection.confidence,
        if selection.threshold_met {
            ""
        } else {
            " (below threshold)"
        }
    );
    println!(
        "Estimated duration {} ms, saved {} ms",
        selection.estimated_duration_ms, selection.estimated_time_saved_ms
    );
    println!("{}", "=".repeat(80));
    for (i, entry) in selection.entries.iter().enumerate() {
        let reason = serde_json::to_value(entry.reason)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        println!("{:>3}. [{:.2}] {} ({reason})", i + 1, entry.score, entry.test_id);
    }
}

pub fn export(ws: &mut Workspace, output: Option<&Path>) -> Result<()> {
    ws.load_graph()?;
    let text = serde_json::to_string_pretty(&ws.export())?;
    match output {
        Some(path) => std::fs::write(path, text + "\n")
            .with_context(|| format!("Failed to write export: {}", path.display())),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

/// Read execution results from a JSON file (`-` for stdin): either an array or
/// `{"results": [...]}`.
pub fn record_results(ws: &mut Workspace, input: &Path, json: bool) -> Result<()> {
    let text = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read results from stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read results: {}", input.display()))?
    };
    let results = parse_results(&text)?;
    let res = ws.record_results(&results)?;
    if json {
        return print_json(&res);
    }
    println!(
        "Recorded {} result(s); {} test(s) tracked",
        res.recorded, res.tracked_test_count
    );
    Ok(())
}

fn parse_results(text: &str) -> Result<Vec<ExecutionResult>> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Input {
        List(Vec<ExecutionResult>),
        Wrapped(RecordRequest),
    }
    let input: Input = serde_json::from_str(text).context("Failed to parse execution results")?;
    Ok(match input {
        Input::List(results) => results,
        Input::Wrapped(req) => req.results,
    })
}
