//! Completion prompt assembly.
//!
//! The prompt is a fixed instruction preamble, the retrieved context, one
//! labeled block per populated structured dataset, the question, and an
//! `Answer:` cue.

use std::fmt::Write;

use crate::models::{OwnerCost, TopService, TrendPoint};

/// System message sent with every completion.
pub const SYSTEM_MESSAGE: &str = "You are a helpful FinOps assistant.";

/// Answer used when the completion backend fails.
pub const APOLOGY: &str = "Sorry, I could not generate an answer right now.";

const PREAMBLE: &str = "You are a FinOps Copilot with access to billing and resource data.
Answer the user question using the context below. Use aggregated cost insights
(by owner, service, or month) whenever possible.

If totals or rankings are requested, compute and summarize them.
If the answer cannot be derived from the context, say \"No data found.\"";

/// Structured datasets attached to a question.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredData {
    pub table: Option<Vec<OwnerCost>>,
    pub trend: Option<Vec<TrendPoint>>,
    pub top_service: Option<TopService>,
}

/// Builds the full completion prompt.
pub fn build_prompt(context: &str, data: &StructuredData, question: &str) -> String {
    let mut prompt = String::new();
    let _ = write!(prompt, "{}\n\nContext:\n{}\n", PREAMBLE, context);

    if let Some(table) = data.table.as_ref().filter(|t| !t.is_empty()) {
        let _ = write!(prompt, "\nCost by Owner Data:\n{}", format_owner_table(table));
    }
    if let Some(trend) = data.trend.as_ref().filter(|t| !t.is_empty()) {
        let _ = write!(prompt, "\nMonthly Trend Data:\n{}", format_trend(trend));
    }
    if let Some(top) = &data.top_service {
        let block = format_top_service(top);
        if !block.is_empty() {
            let _ = write!(prompt, "\nTop Service Expenditures:\n{}", block);
        }
    }

    let _ = write!(prompt, "\nUser Question: {}\nAnswer:\n", question);
    prompt
}

/// One `Owner=…, Cost=$…` line per row.
pub fn format_owner_table(rows: &[OwnerCost]) -> String {
    rows.iter()
        .map(|r| format!("Owner={}, Cost=${:.2}\n", r.owner, r.cost))
        .collect()
}

/// One `month: $total` line per point.
pub fn format_trend(points: &[TrendPoint]) -> String {
    points
        .iter()
        .map(|p| format!("{}: ${:.2}\n", p.month, p.total_cost))
        .collect()
}

/// Numbered ranking, or a single line for the most used service.
pub fn format_top_service(top: &TopService) -> String {
    match top {
        TopService::MostUsed(s) => format!("Service={}, Cost=${:.2}\n", s.service, s.cost),
        TopService::Ranked(rows) => rows
            .iter()
            .enumerate()
            .map(|(i, r)| {
                format!(
                    "{}. Service={}, Resource={}, Owner={}, Cost=${:.2}\n",
                    i + 1,
                    r.service,
                    r.resource_id,
                    r.owner,
                    r.total_cost
                )
            })
            .collect(),
    }
}
