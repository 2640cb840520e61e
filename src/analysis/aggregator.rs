//! CSAT aggregation and statistics.
//!
//! Pure functions over the final record collection: headline CSAT, agent
//! ranking, per-sector and per-account breakdowns and the daily trend.

use crate::classifier::fold;
use crate::models::ResponseRecord;
use crate::normalizer::GradePolicy;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Timestamp layouts seen in survey exports, most common first.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// Headline numbers for a set of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsatSummary {
    pub total: usize,
    /// Records with a grade inside the scale.
    pub graded: usize,
    pub promoters: usize,
    /// Promoters over graded, as a percentage.
    pub csat: Option<f64>,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent: String,
    pub sector: String,
    #[serde(flatten)]
    pub summary: CsatSummary,
}

/// Summary of one group (sector, account, day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub name: String,
    #[serde(flatten)]
    pub summary: CsatSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub summary: CsatSummary,
}

/// Everything the report shows about a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: CsatSummary,
    pub agents: Vec<AgentStats>,
    pub sectors: Vec<GroupStats>,
    pub accounts: Vec<GroupStats>,
    pub trend: Vec<DailyPoint>,
    /// Records whose response date could not be read.
    pub undated: usize,
}

/// Run every aggregation over `records`.
pub fn analyze(records: &[ResponseRecord], grades: &GradePolicy, min_agent_responses: usize) -> Analysis {
    let (trend, undated) = daily_trend(records, grades);
    Analysis {
        summary: summarize(records.iter(), grades),
        agents: agent_ranking(records, grades, min_agent_responses),
        sectors: breakdown_by(records, grades, |r| r.sector.clone()),
        accounts: breakdown_by(records, grades, |r| r.account_name.clone()),
        trend,
        undated,
    }
}

/// Compute CSAT figures over any record iterator.
pub fn summarize<'a>(
    records: impl IntoIterator<Item = &'a ResponseRecord>,
    grades: &GradePolicy,
) -> CsatSummary {
    let mut summary = CsatSummary::default();
    let mut sum = 0i64;

    for record in records {
        summary.total += 1;
        let Some(grade) = record.grade.filter(|g| grades.is_valid(*g)) else {
            continue;
        };
        summary.graded += 1;
        sum += grade as i64;
        if grades.is_promoter(grade) {
            summary.promoters += 1;
        }
    }

    if summary.graded > 0 {
        let graded = summary.graded as f64;
        summary.csat = Some(summary.promoters as f64 / graded * 100.0);
        summary.average = Some(sum as f64 / graded);
    }
    summary
}

/// Group records by agent name.
pub fn group_by_agent(records: &[ResponseRecord]) -> HashMap<String, Vec<&ResponseRecord>> {
    let mut grouped: HashMap<String, Vec<&ResponseRecord>> = HashMap::new();

    for record in records {
        grouped.entry(record.agent.clone()).or_default().push(record);
    }

    grouped
}

/// Agents with at least `min_responses` graded responses, best CSAT first.
///
/// Ties break on graded count (more first), then on name.
pub fn agent_ranking(
    records: &[ResponseRecord],
    grades: &GradePolicy,
    min_responses: usize,
) -> Vec<AgentStats> {
    let mut ranking: Vec<AgentStats> = group_by_agent(records)
        .into_iter()
        .map(|(agent, group)| AgentStats {
            sector: group
                .first()
                .map(|r| r.sector.clone())
                .unwrap_or_default(),
            summary: summarize(group, grades),
            agent,
        })
        .filter(|a| a.summary.graded > 0 && a.summary.graded >= min_responses)
        .collect();

    ranking.sort_by(|a, b| {
        let a_csat = a.summary.csat.unwrap_or(0.0);
        let b_csat = b.summary.csat.unwrap_or(0.0);
        b_csat
            .partial_cmp(&a_csat)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.summary.graded.cmp(&a.summary.graded))
            .then_with(|| a.agent.cmp(&b.agent))
    });

    ranking
}

/// Summaries grouped by an arbitrary key, sorted by key.
pub fn breakdown_by(
    records: &[ResponseRecord],
    grades: &GradePolicy,
    key: impl Fn(&ResponseRecord) -> String,
) -> Vec<GroupStats> {
    let mut grouped: BTreeMap<String, Vec<&ResponseRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(key(record)).or_default().push(record);
    }

    grouped
        .into_iter()
        .map(|(name, group)| GroupStats {
            name,
            summary: summarize(group, grades),
        })
        .collect()
}

/// Per-day summaries in date order, plus the count of undated records.
pub fn daily_trend(records: &[ResponseRecord], grades: &GradePolicy) -> (Vec<DailyPoint>, usize) {
    let mut by_day: BTreeMap<NaiveDate, Vec<&ResponseRecord>> = BTreeMap::new();
    let mut undated = 0;

    for record in records {
        match parse_response_date(&record.responded_at) {
            Some(date) => by_day.entry(date).or_default().push(record),
            None => undated += 1,
        }
    }

    let trend = by_day
        .into_iter()
        .map(|(date, group)| DailyPoint {
            date,
            summary: summarize(group, grades),
        })
        .collect();
    (trend, undated)
}

/// Read the calendar day of a response timestamp.
pub fn parse_response_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
        })
}

/// Records whose service matches `service`, ignoring case and accents.
///
/// When no record names a service at all (CSV imports, say) there is nothing
/// to match against, so the records are returned untouched.
pub fn filter_by_service(records: Vec<ResponseRecord>, service: &str) -> Vec<ResponseRecord> {
    if records.iter().all(|r| r.service.is_none()) {
        warn!(
            "No record names a service; ignoring service filter '{}'",
            service
        );
        return records;
    }

    let wanted = fold(service);
    records
        .into_iter()
        .filter(|r| r.service.as_deref().map(fold).as_deref() == Some(wanted.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(agent: &str, sector: &str, grade: Option<i32>, date: &str) -> ResponseRecord {
        ResponseRecord {
            protocol: None,
            agent: agent.to_string(),
            sector: sector.to_string(),
            grade,
            comment: String::new(),
            responded_at: date.to_string(),
            account_id: "1".to_string(),
            account_name: "Matriz".to_string(),
            survey_id: "10".to_string(),
            question_id: "1".to_string(),
            question_text: "Atendimento".to_string(),
            service: None,
            deep_link: None,
        }
    }

    fn sample() -> Vec<ResponseRecord> {
        vec![
            record("ANA", "SUPORTE", Some(10), "2025-01-02 10:00:00"),
            record("ANA", "SUPORTE", Some(9), "2025-01-02 11:00:00"),
            record("ANA", "SUPORTE", Some(4), "03/01/2025 09:15"),
            record("BRUNO", "VENDAS", Some(8), "2025-01-03"),
            record("BRUNO", "VENDAS", None, "2025-01-03"),
            record("CAIO", "VENDAS", Some(-1), "sem data"),
            record("DORA", "SUPORTE", Some(2), "2025-01-04T08:00:00"),
        ]
    }

    #[test]
    fn test_summarize_skips_missing_and_out_of_scale_grades() {
        let summary = summarize(&sample(), &GradePolicy::default());

        assert_eq!(summary.total, 7);
        assert_eq!(summary.graded, 5);
        assert_eq!(summary.promoters, 3);
        assert_eq!(summary.csat, Some(60.0));
        assert_eq!(summary.average, Some(33.0 / 5.0));
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&[], &GradePolicy::default());
        assert_eq!(summary.total, 0);
        assert_eq!(summary.csat, None);
        assert_eq!(summary.average, None);
    }

    #[test]
    fn test_agent_ranking_order_and_minimum() {
        let grades = GradePolicy::default();

        let ranking = agent_ranking(&sample(), &grades, 1);
        let names: Vec<&str> = ranking.iter().map(|a| a.agent.as_str()).collect();
        // BRUNO 100% (1), ANA 66.7% (3), DORA 0% (1); CAIO has no valid grade
        assert_eq!(names, vec!["BRUNO", "ANA", "DORA"]);
        assert_eq!(ranking[1].sector, "SUPORTE");

        let ranking = agent_ranking(&sample(), &grades, 2);
        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking[0].agent, "ANA");
    }

    #[test]
    fn test_sector_breakdown() {
        let sectors = breakdown_by(&sample(), &GradePolicy::default(), |r| r.sector.clone());

        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[0].name, "SUPORTE");
        assert_eq!(sectors[0].summary.graded, 4);
        assert_eq!(sectors[1].name, "VENDAS");
        assert_eq!(sectors[1].summary.csat, Some(100.0));
    }

    #[test]
    fn test_daily_trend() {
        let (trend, undated) = daily_trend(&sample(), &GradePolicy::default());

        assert_eq!(undated, 1);
        let days: Vec<String> = trend.iter().map(|p| p.date.to_string()).collect();
        assert_eq!(days, vec!["2025-01-02", "2025-01-03", "2025-01-04"]);
        assert_eq!(trend[1].summary.total, 3);
        assert_eq!(trend[1].summary.graded, 2);
    }

    #[test]
    fn test_parse_response_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 9);
        assert_eq!(parse_response_date("2025-03-09 14:02:11"), expected);
        assert_eq!(parse_response_date("2025-03-09T14:02:11.250"), expected);
        assert_eq!(parse_response_date("09/03/2025 14:02"), expected);
        assert_eq!(parse_response_date("09/03/2025"), expected);
        assert_eq!(parse_response_date(""), None);
        assert_eq!(parse_response_date("ontem"), None);
    }

    #[test]
    fn test_filter_by_service() {
        let mut records = sample();
        records[0].service = Some("Suporte Técnico".to_string());
        records[1].service = Some("Vendas".to_string());

        let filtered = filter_by_service(records, "suporte tecnico");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].grade, Some(10));
    }

    #[test]
    fn test_filter_by_service_without_any_service_keeps_records() {
        let filtered = filter_by_service(sample(), "Suporte");
        assert_eq!(filtered.len(), sample().len());
    }

    #[test]
    fn test_analyze_bundles_everything() {
        let analysis = analyze(&sample(), &GradePolicy::default(), 1);
        assert_eq!(analysis.summary.total, 7);
        assert_eq!(analysis.agents.len(), 3);
        assert_eq!(analysis.accounts.len(), 1);
        assert_eq!(analysis.accounts[0].name, "Matriz");
        assert_eq!(analysis.undated, 1);
    }
}
