//! Metrics scraped from formatter output.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static BLACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+files?\s+reformatted").expect("valid regex"));
static RUFF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Found\s+\d+\s+errors?\s+\((\d+)\s+fixed,\s+(\d+)\s+remaining\)")
        .expect("valid regex")
});
static CLEANUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Cleanup:\s+(\d+)/(\d+)\s+files\s+changed").expect("valid regex")
});

/// Parse `prettier_formatted`, `black_reformatted`, `ruff_fixed`,
/// `ruff_remaining`, `cleanup_changed` and `cleanup_total` from a report.
/// Missing values are zero.
pub fn parse_format_metrics(output: &str) -> BTreeMap<String, i64> {
    let num = |s: &str| s.parse::<i64>().unwrap_or(0);

    let black = BLACK_RE.captures(output).map_or(0, |c| num(&c[1]));
    let (ruff_fixed, ruff_remaining) = RUFF_RE
        .captures(output)
        .map_or((0, 0), |c| (num(&c[1]), num(&c[2])));
    let (cleanup_changed, cleanup_total) = CLEANUP_RE
        .captures(output)
        .map_or((0, 0), |c| (num(&c[1]), num(&c[2])));
    // black also prints "reformatted <file>.py"; count only the rest
    let prettier = output
        .lines()
        .filter_map(|l| l.strip_prefix("reformatted "))
        .filter(|path| !path.trim().to_lowercase().ends_with(".py"))
        .count() as i64;

    BTreeMap::from([
        ("prettier_formatted".to_string(), prettier),
        ("black_reformatted".to_string(), black),
        ("ruff_fixed".to_string(), ruff_fixed),
        ("ruff_remaining".to_string(), ruff_remaining),
        ("cleanup_changed".to_string(), cleanup_changed),
        ("cleanup_total".to_string(), cleanup_total),
    ])
}

/// Short human summary appended to format reports.
pub fn format_summary(metrics: &BTreeMap<String, i64>) -> String {
    let get = |k: &str| metrics.get(k).copied().unwrap_or(0);
    format!(
        "=== Format summary ===\n\
         Prettier: {} files formatted\n\
         Black:    {} files reformatted\n\
         Ruff:     {} fixed, {} remaining\n\
         Cleanup:  {}/{} files changed\n",
        get("prettier_formatted"),
        get("black_reformatted"),
        get("ruff_fixed"),
        get("ruff_remaining"),
        get("cleanup_changed"),
        get("cleanup_total"),
    )
}
