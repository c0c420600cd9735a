use pretty_assertions::assert_eq;

use super::*;

const VENDOR_CSV: &str = "Vendor,Amount,Date\nAcme,120.50,2024-01-03\nGlobex,75.00,2024-01-09\nInitech,310.25,2024-02-14\n";

fn analyze(raw: &str) -> DegradedResult {
    StructuralAnalyzer::new()
        .analyze(raw, "Which vendor costs the most?")
        .expect("structural analyzer never fails")
}

#[test]
fn profiles_header_rows_and_categories() {
    let result = analyze(VENDOR_CSV);

    assert!(result.parsed);
    assert_eq!(result.delimiter, Some(','));
    assert_eq!(result.row_count, 3);
    assert_eq!(
        result.columns,
        vec![
            ColumnProfile {
                name: "Vendor".to_owned(),
                category: ColumnCategory::Other,
            },
            ColumnProfile {
                name: "Amount".to_owned(),
                category: ColumnCategory::Financial,
            },
            ColumnProfile {
                name: "Date".to_owned(),
                category: ColumnCategory::Temporal,
            },
        ]
    );
    assert_eq!(result.sample_row, vec!["Acme", "120.50", "2024-01-03"]);
}

#[test]
fn summary_is_labeled_and_lists_structure() {
    let summary = analyze(VENDOR_CSV).summary;

    assert!(summary.starts_with("Fallback analysis (degraded"));
    assert!(summary.contains("Question: Which vendor costs the most?"));
    assert!(summary.contains("Total columns: 3"));
    assert!(summary.contains("Total rows: 3"));
    assert!(summary.contains("Columns: Vendor, Amount, Date"));
    assert!(summary.contains("Financial columns: Amount"));
    assert!(summary.contains("Temporal columns: Date"));
    assert!(summary.contains("Sample row: Vendor=Acme, Amount=120.50, Date=2024-01-03"));
}

#[test]
fn empty_input_is_an_unparsed_result_not_an_error() {
    for raw in ["", "   \n\n  ", "\u{feff}"] {
        let result = analyze(raw);
        assert!(!result.parsed);
        assert_eq!(result.row_count, 0);
        assert!(result.columns.is_empty());
        assert!(result.summary.contains("Could not parse input: input is empty"));
    }
}

#[test]
fn header_of_only_delimiters_is_unparsed() {
    let result = analyze(",,,\n1,2,3,4\n");
    assert!(!result.parsed);
    assert!(result.summary.contains("header row has no column names"));
}

#[test]
fn detects_tab_and_semicolon_and_trims_quotes() {
    let tabbed = analyze("\"region\"\t'revenue'\n north\t 10\n");
    assert_eq!(tabbed.delimiter, Some('\t'));
    let names: Vec<&str> = tabbed.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["region", "revenue"]);
    assert_eq!(tabbed.sample_row, vec!["north", "10"]);

    let semi = analyze("id;created_at;price\r\n1;2024;3\r\n\r\n2;2025;4\r\n");
    assert_eq!(semi.delimiter, Some(';'));
    assert_eq!(semi.row_count, 2);
    assert_eq!(
        semi.columns_in(ColumnCategory::Temporal).collect::<Vec<_>>(),
        vec!["created_at"]
    );
}

#[test]
fn single_column_input_has_no_delimiter() {
    let result = analyze("notes\nfirst\nsecond\n");
    assert_eq!(result.delimiter, None);
    assert_eq!(result.columns.len(), 1);
    assert_eq!(result.row_count, 2);
}

#[test]
fn header_only_input_has_no_sample() {
    let result = analyze("Vendor,Amount\n");
    assert!(result.parsed);
    assert_eq!(result.row_count, 0);
    assert!(result.sample_row.is_empty());
    assert!(!result.summary.contains("Sample row"));
}

#[test]
fn classification_prefers_financial_hints() {
    assert_eq!(
        ColumnCategory::classify("Payment Date"),
        ColumnCategory::Financial
    );
    assert_eq!(ColumnCategory::classify("Quarter"), ColumnCategory::Temporal);
    assert_eq!(ColumnCategory::classify("Region"), ColumnCategory::Other);
}
