use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::errors::FallbackError;

const CANDIDATE_DELIMITERS: [char; 4] = [',', '\t', ';', '|'];
const QUOTE_CHARS: [char; 2] = ['"', '\''];
const FINANCIAL_HINTS: [&str; 16] = [
    "amount", "price", "cost", "revenue", "total", "balance", "payment", "salary", "fee", "tax",
    "expense", "income", "profit", "spend", "budget", "invoice",
];
const TEMPORAL_HINTS: [&str; 10] = [
    "date", "time", "year", "month", "day", "week", "quarter", "period", "created", "timestamp",
];
const DEGRADED_HEADER: &str = "Fallback analysis (degraded: remote analysis unavailable)";

/// Local substitute for the remote worker. Must be pure and must not make remote calls.
pub trait FallbackAnalyzer: Send + Sync {
    fn analyze(&self, raw_input: &str, question: &str) -> Result<DegradedResult, FallbackError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnCategory {
    Financial,
    Temporal,
    Other,
}

impl ColumnCategory {
    /// Substring heuristic on the column name; financial hints win over temporal ones.
    pub fn classify(name: &str) -> Self {
        let name = name.to_lowercase();
        if FINANCIAL_HINTS.iter().any(|hint| name.contains(hint)) {
            Self::Financial
        } else if TEMPORAL_HINTS.iter().any(|hint| name.contains(hint)) {
            Self::Temporal
        } else {
            Self::Other
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnProfile {
    pub name: String,
    pub category: ColumnCategory,
}

/// Structural summary produced without the remote worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedResult {
    pub parsed: bool,
    pub delimiter: Option<char>,
    pub columns: Vec<ColumnProfile>,
    pub row_count: usize,
    pub sample_row: Vec<String>,
    pub summary: String,
}

impl DegradedResult {
    fn unparsed(reason: &str, question: &str) -> Self {
        let mut summary = format!("{DEGRADED_HEADER}\n");
        push_question(&mut summary, question);
        let _ = write!(summary, "Could not parse input: {reason}");
        Self {
            parsed: false,
            delimiter: None,
            columns: Vec::new(),
            row_count: 0,
            sample_row: Vec::new(),
            summary,
        }
    }

    pub fn columns_in(&self, category: ColumnCategory) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(move |column| column.category == category)
            .map(|column| column.name.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParseIssue {
    Empty,
    BlankHeader,
}

impl ParseIssue {
    fn reason(self) -> &'static str {
        match self {
            Self::Empty => "input is empty",
            Self::BlankHeader => "header row has no column names",
        }
    }
}

/// Delimited-text profiler: header detection, column classification, row count, sample row.
/// Parse problems become an unparsed result, never an error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StructuralAnalyzer;

impl StructuralAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn profile(raw_input: &str, question: &str) -> Result<DegradedResult, ParseIssue> {
        let input = raw_input.trim_start_matches('\u{feff}');
        let mut lines = input.lines().map(str::trim_end).filter(|line| !line.trim().is_empty());
        let header = lines.next().ok_or(ParseIssue::Empty)?;

        let delimiter = detect_delimiter(header);
        let names = split_cells(header, delimiter);
        if names.iter().all(String::is_empty) {
            return Err(ParseIssue::BlankHeader);
        }
        let columns: Vec<ColumnProfile> = names
            .into_iter()
            .map(|name| ColumnProfile {
                category: ColumnCategory::classify(&name),
                name,
            })
            .collect();

        let mut row_count = 0usize;
        let mut sample_row = Vec::new();
        for line in lines {
            if row_count == 0 {
                sample_row = split_cells(line, delimiter);
            }
            row_count += 1;
        }

        let mut result = DegradedResult {
            parsed: true,
            delimiter,
            columns,
            row_count,
            sample_row,
            summary: String::new(),
        };
        result.summary = render_summary(&result, question);
        Ok(result)
    }
}

impl FallbackAnalyzer for StructuralAnalyzer {
    fn analyze(&self, raw_input: &str, question: &str) -> Result<DegradedResult, FallbackError> {
        Ok(Self::profile(raw_input, question)
            .unwrap_or_else(|issue| DegradedResult::unparsed(issue.reason(), question)))
    }
}

/// Most frequent candidate delimiter in the header, earlier candidates winning ties.
/// `None` means a single-column header.
fn detect_delimiter(header: &str) -> Option<char> {
    let mut best: Option<(char, usize)> = None;
    for candidate in CANDIDATE_DELIMITERS {
        let count = header.matches(candidate).count();
        if count > best.map_or(0, |(_, best_count)| best_count) {
            best = Some((candidate, count));
        }
    }
    best.map(|(candidate, _)| candidate)
}

fn split_cells(line: &str, delimiter: Option<char>) -> Vec<String> {
    let clean = |cell: &str| cell.trim().trim_matches(&QUOTE_CHARS[..]).trim().to_owned();
    match delimiter {
        Some(delimiter) => line.split(delimiter).map(clean).collect(),
        None => vec![clean(line)],
    }
}

fn push_question(summary: &mut String, question: &str) {
    let question = question.trim();
    if !question.is_empty() {
        let _ = writeln!(summary, "Question: {question}");
    }
}

fn render_summary(result: &DegradedResult, question: &str) -> String {
    let mut out = format!("{DEGRADED_HEADER}\n");
    push_question(&mut out, question);
    if let Some(delimiter) = result.delimiter {
        let _ = writeln!(out, "Delimiter: {:?}", delimiter);
    }
    let _ = writeln!(out, "Total columns: {}", result.columns.len());
    let _ = writeln!(out, "Total rows: {}", result.row_count);
    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    let _ = writeln!(out, "Columns: {}", names.join(", "));

    for (label, category) in [
        ("Financial columns", ColumnCategory::Financial),
        ("Temporal columns", ColumnCategory::Temporal),
    ] {
        let matched: Vec<&str> = result.columns_in(category).collect();
        if !matched.is_empty() {
            let _ = writeln!(out, "{label}: {}", matched.join(", "));
        }
    }

    if !result.sample_row.is_empty() {
        let pairs: Vec<String> = result
            .columns
            .iter()
            .zip(result.sample_row.iter())
            .map(|(column, value)| format!("{}={}", column.name, value))
            .collect();
        let _ = writeln!(out, "Sample row: {}", pairs.join(", "));
    }
    out.trim_end().to_owned()
}

#[cfg(test)]
mod tests;
