//! Markdown report generation.
//!
//! This module renders CSAT reports as Markdown or JSON and exports the
//! harvested records as CSV.

use crate::analysis::{AgentStats, CsatSummary, DailyPoint, GroupStats};
use crate::classifier::QuestionAudit;
use crate::fetcher::RunReport;
use crate::models::{Report, ReportMetadata, ReportSource, ResponseRecord};
use anyhow::{Context, Result};
use std::path::Path;

/// Column order of the CSV export.
const CSV_HEADER: [&str; 13] = [
    "protocol",
    "agent",
    "sector",
    "grade",
    "comment",
    "responded_at",
    "account_id",
    "account_name",
    "survey_id",
    "question_id",
    "question_text",
    "service",
    "deep_link",
];

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# CSAT Report\n\n");

    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_table_of_contents(report));
    output.push_str(&generate_summary_section(&report.analysis.summary));
    output.push_str(&generate_ranking_section(&report.analysis.agents));
    output.push_str(&generate_group_section("Sectors", "Sector", &report.analysis.sectors));
    output.push_str(&generate_group_section("Accounts", "Account", &report.analysis.accounts));
    output.push_str(&generate_trend_section(
        &report.analysis.trend,
        report.analysis.undated,
    ));

    if let Some(ref run) = report.run {
        output.push_str(&generate_audit_section(&run.audit));
        output.push_str(&generate_run_section(run));
    }

    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    match &metadata.source {
        ReportSource::Api {
            base_url,
            range,
            accounts,
            surveys,
        } => {
            section.push_str(&format!("- **API:** {}\n", base_url));
            section.push_str(&format!("- **Period:** {} to {}\n", range.start, range.end));
            section.push_str(&format!("- **Accounts:** {}\n", accounts.join(", ")));
            section.push_str(&format!("- **Surveys:** {}\n", surveys.join(", ")));
        }
        ReportSource::Import { file, rows } => {
            section.push_str(&format!("- **Imported File:** `{}`\n", file));
            section.push_str(&format!("- **Rows Read:** {}\n", rows));
        }
    }
    if let Some(ref service) = metadata.service {
        section.push_str(&format!("- **Service:** {}\n", service));
    }
    section.push_str(&format!("- **Merge Policy:** `{}`\n", metadata.merge_policy));
    section.push_str(&format!("- **Records:** {}\n", metadata.records));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &Report) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Summary](#summary)\n");
    toc.push_str("- [Agent Ranking](#agent-ranking)\n");
    toc.push_str("- [Sectors](#sectors)\n");
    toc.push_str("- [Accounts](#accounts)\n");
    toc.push_str("- [Daily Trend](#daily-trend)\n");
    if report.run.is_some() {
        toc.push_str("- [Question Audit](#question-audit)\n");
        toc.push_str("- [Run Report](#run-report)\n");
    }
    toc.push('\n');

    toc
}

/// Generate the summary section.
fn generate_summary_section(summary: &CsatSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Responses | Graded | Promoters | **CSAT** | Average |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | **{}** | {} |\n\n",
        summary.total,
        summary.graded,
        summary.promoters,
        format_percent(summary.csat),
        format_average(summary.average)
    ));

    if summary.graded == 0 {
        section.push_str("No graded responses in this collection.\n\n");
    }

    section
}

fn generate_ranking_section(agents: &[AgentStats]) -> String {
    let mut section = String::new();

    section.push_str("## Agent Ranking\n\n");
    if agents.is_empty() {
        section.push_str("No agent reached the minimum number of graded responses.\n\n");
        return section;
    }

    section.push_str("| # | Agent | Sector | Graded | Promoters | CSAT | Average |\n");
    section.push_str("|:---:|:---|:---|:---:|:---:|:---:|:---:|\n");
    for (i, agent) in agents.iter().enumerate() {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            i + 1,
            agent.agent,
            agent.sector,
            agent.summary.graded,
            agent.summary.promoters,
            format_percent(agent.summary.csat),
            format_average(agent.summary.average)
        ));
    }
    section.push('\n');

    section
}

fn generate_group_section(title: &str, column: &str, groups: &[GroupStats]) -> String {
    if groups.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str(&format!("## {}\n\n", title));
    section.push_str(&format!("| {} | Responses | Graded | CSAT | Average |\n", column));
    section.push_str("|:---|:---:|:---:|:---:|:---:|\n");
    for group in groups {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            group.name,
            group.summary.total,
            group.summary.graded,
            format_percent(group.summary.csat),
            format_average(group.summary.average)
        ));
    }
    section.push('\n');

    section
}

fn generate_trend_section(trend: &[DailyPoint], undated: usize) -> String {
    let mut section = String::new();

    section.push_str("## Daily Trend\n\n");
    if trend.is_empty() {
        section.push_str("No dated responses.\n\n");
    } else {
        section.push_str("| Date | Responses | Graded | CSAT |\n");
        section.push_str("|:---|:---:|:---:|:---:|\n");
        for point in trend {
            section.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                point.date,
                point.summary.total,
                point.summary.graded,
                format_percent(point.summary.csat)
            ));
        }
        section.push('\n');
    }

    if undated > 0 {
        section.push_str(&format!(
            "*{} responses had no readable date and are left out of the trend.*\n\n",
            undated
        ));
    }

    section
}

/// Generate the question audit: which questions were kept and why others were not.
fn generate_audit_section(audit: &QuestionAudit) -> String {
    let mut section = String::new();

    section.push_str("## Question Audit\n\n");
    if audit.is_empty() {
        section.push_str("No questions were seen.\n\n");
        return section;
    }

    section.push_str(&format!("### Accepted ({})\n\n", audit.accepted.len()));
    for label in &audit.accepted {
        section.push_str(&format!("- {}\n", label));
    }
    section.push('\n');

    if !audit.rejected.is_empty() {
        section.push_str(&format!("### Rejected ({})\n\n", audit.rejected.len()));
        section.push_str("| Question | Reason |\n");
        section.push_str("|:---|:---|\n");
        for (label, reason) in &audit.rejected {
            section.push_str(&format!("| {} | {} |\n", label, reason));
        }
        section.push('\n');
    }

    section
}

fn generate_run_section(run: &RunReport) -> String {
    let mut section = String::new();

    section.push_str("## Run Report\n\n");
    section.push_str("| Combinations | Pages | Retries | Raw Responses | Rejected | Duplicates |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | {} |\n\n",
        run.combinations,
        run.pages_fetched,
        run.retries,
        run.raw_responses,
        run.rejected_responses,
        run.duplicates
    ));

    if run.max_pages_hits > 0 {
        section.push_str(&format!(
            "- ⚠️ Page limit reached in {} combination(s); data may be incomplete.\n",
            run.max_pages_hits
        ));
    }
    if run.zero_yield_stops > 0 {
        section.push_str(&format!(
            "- ⚠️ {} combination(s) stopped after consecutive pages with no new records.\n",
            run.zero_yield_stops
        ));
    }
    if run.max_pages_hits > 0 || run.zero_yield_stops > 0 {
        section.push('\n');
    }

    if !run.abandoned.is_empty() {
        section.push_str("### Abandoned Combinations\n\n");
        section.push_str("| Combination | Page | Last Error |\n");
        section.push_str("|:---|:---:|:---|\n");
        for abandoned in &run.abandoned {
            section.push_str(&format!(
                "| {} | {} | {} |\n",
                abandoned.combination,
                abandoned.page,
                abandoned.error.replace('|', "\\|")
            ));
        }
        section.push('\n');
    }

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by csat-harvester v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

fn format_percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.1}%", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn format_average(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write every record to a CSV file.
pub fn write_csv_export(records: &[ResponseRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(CSV_HEADER)?;
    for record in records {
        let grade = record.grade.map(|g| g.to_string()).unwrap_or_default();
        writer.write_record([
            record.protocol.as_deref().unwrap_or(""),
            record.agent.as_str(),
            record.sector.as_str(),
            grade.as_str(),
            record.comment.as_str(),
            record.responded_at.as_str(),
            record.account_id.as_str(),
            record.account_name.as_str(),
            record.survey_id.as_str(),
            record.question_id.as_str(),
            record.question_text.as_str(),
            record.service.as_deref().unwrap_or(""),
            record.deep_link.as_deref().unwrap_or(""),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use crate::fetcher::AbandonedCombination;
    use crate::models::DateRange;
    use crate::normalizer::GradePolicy;
    use chrono::{NaiveDate, Utc};

    fn record(protocol: Option<&str>, agent: &str, grade: Option<i32>) -> ResponseRecord {
        ResponseRecord {
            protocol: protocol.map(String::from),
            agent: agent.to_string(),
            sector: "SUPORTE".to_string(),
            grade,
            comment: "muito bom; rápido".to_string(),
            responded_at: "2025-01-02 10:00:00".to_string(),
            account_id: "12".to_string(),
            account_name: "Conta Norte".to_string(),
            survey_id: "77".to_string(),
            question_id: "1".to_string(),
            question_text: "Sobre sua experiência com o atendimento".to_string(),
            service: Some("Suporte".to_string()),
            deep_link: protocol.map(|p| format!("https://app.test/{}", p)),
        }
    }

    fn create_test_report() -> Report {
        let records = vec![
            record(Some("100"), "ANA", Some(10)),
            record(Some("101"), "ANA", Some(6)),
            record(None, "BRUNO", None),
        ];

        let mut run = RunReport {
            combinations: 2,
            pages_fetched: 3,
            retries: 2,
            raw_responses: 5,
            rejected_responses: 1,
            duplicates: 1,
            records: 3,
            max_pages_hits: 1,
            ..RunReport::default()
        };
        run.abandoned.push(AbandonedCombination {
            combination: "account 14 / survey 77 / 2025-01-01..2025-01-20".to_string(),
            page: 2,
            error: "request timed out".to_string(),
        });
        run.audit.accepted.insert("[1] Sobre sua experiência com o atendimento".to_string());
        run.audit
            .rejected
            .insert("[2] Como avalia sua internet?".to_string(), "keyword 'internet'".to_string());

        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        )
        .unwrap();

        Report {
            metadata: ReportMetadata {
                source: ReportSource::Api {
                    base_url: "https://api.test".to_string(),
                    range,
                    accounts: vec!["12".to_string(), "14".to_string()],
                    surveys: vec!["77".to_string()],
                },
                generated_at: Utc::now(),
                merge_policy: "composite".to_string(),
                service: None,
                records: records.len(),
                duration_seconds: 4.2,
            },
            analysis: analyze(&records, &GradePolicy::default(), 1),
            run: Some(run),
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# CSAT Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("- **Period:** 2025-01-01 to 2025-01-31"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("| 3 | 2 | 1 | **50.0%** | 8.00 |"));
        assert!(markdown.contains("| 1 | ANA | SUPORTE | 2 | 1 | 50.0% | 8.00 |"));
        assert!(markdown.contains("## Question Audit"));
        assert!(markdown.contains("| [2] Como avalia sua internet? | keyword 'internet' |"));
        assert!(markdown.contains("### Abandoned Combinations"));
        assert!(markdown.contains("Page limit reached in 1 combination(s)"));
    }

    #[test]
    fn test_import_report_has_no_run_sections() {
        let mut report = create_test_report();
        report.run = None;
        report.metadata.source = ReportSource::Import {
            file: "export.csv".to_string(),
            rows: 3,
        };

        let markdown = generate_markdown_report(&report);
        assert!(markdown.contains("- **Imported File:** `export.csv`"));
        assert!(!markdown.contains("## Question Audit"));
        assert!(!markdown.contains("## Run Report"));
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"metadata\""));
        assert!(json.contains("\"kind\": \"api\""));

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["analysis"]["summary"]["promoters"], 1);
        assert_eq!(parsed["run"]["retries"], 2);
    }

    #[test]
    fn test_write_csv_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        let records = vec![
            record(Some("0000123"), "ANA", Some(9)),
            record(None, "BRUNO", None),
        ];

        write_csv_export(&records, &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, CSV_HEADER);

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "0000123");
        assert_eq!(&rows[0][3], "9");
        assert_eq!(&rows[0][4], "muito bom; rápido");
        assert_eq!(&rows[1][0], "");
        assert_eq!(&rows[1][3], "");
    }
}
