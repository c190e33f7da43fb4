//! Renders an analysis as labelled plain-text sections for the text
//! generator.
//!
//! Sections always appear, in a fixed order. A section or field without data
//! renders [`NO_DATA`] so gaps stay visible downstream.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::analysis::{
    AnalysisResult, BlockAnalysis, MevIndicator, RiskAssessment, TransactionAnalysis,
};
use crate::models::RecordKind;

pub const NO_DATA: &str = "No data available";

pub const TRANSACTION_SECTIONS: &[&str] = &[
    "TRANSACTION OVERVIEW",
    "CLASSIFICATION",
    "RISK ASSESSMENT",
    "COMPLEXITY",
    "BEHAVIOURAL CLUSTER",
    "MEV INDICATORS",
    "TRADING PATTERNS",
    "LIQUIDITY",
];

pub const BLOCK_SECTIONS: &[&str] = &[
    "BLOCK OVERVIEW",
    "NETWORK HEALTH",
    "ACTIVITY",
    "TRANSACTION TYPES",
    "CLUSTERS",
    "MEV INDICATORS",
    "RISK ASSESSMENT",
];

const TRANSACTION_DIRECTIVE: &str = "Write a transaction analysis report for a general audience. \
Cover what the transaction did, who was involved, what it cost, the risk level and the factors behind it, \
and any MEV indicators with their confidence. State clearly when a section reports no data. \
Include exactly one mermaid flowchart in a ```mermaid fenced block showing the flow of value between the addresses involved. \
Do not present the heuristics as certainties or as financial advice.";

const BLOCK_DIRECTIVE: &str = "Write a block analysis report for a general audience. \
Cover network health and congestion, fee pressure, the mix of transaction types and behavioural clusters in the sample, \
MEV indicators and the block risk level with its factors. State clearly when a section reports no data. \
Include exactly one mermaid diagram in a ```mermaid fenced block (a pie chart of transaction types is preferred). \
Do not present the heuristics as certainties or as financial advice.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedContext {
    pub kind: RecordKind,
    pub text: String,
    pub directive: String,
}

struct Section {
    title: &'static str,
    lines: Vec<String>,
}

impl Section {
    fn new(title: &'static str) -> Self {
        Self {
            title,
            lines: Vec::new(),
        }
    }

    fn line(mut self, label: &str, value: impl std::fmt::Display) -> Self {
        self.lines.push(format!("{}: {}", label, value));
        self
    }

    fn opt(self, label: &str, value: Option<impl std::fmt::Display>) -> Self {
        match value {
            Some(v) => self.line(label, v),
            None => self.line(label, NO_DATA),
        }
    }

    fn raw(mut self, line: String) -> Self {
        self.lines.push(line);
        self
    }

    fn render(&self, out: &mut String) {
        out.push_str("=== ");
        out.push_str(self.title);
        out.push_str(" ===\n");
        if self.lines.is_empty() {
            out.push_str(NO_DATA);
            out.push('\n');
        }
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
}

pub fn format(result: &AnalysisResult) -> FormattedContext {
    let (kind, sections, directive) = match result {
        AnalysisResult::Transaction(tx) => (
            RecordKind::Transaction,
            transaction_sections(tx),
            TRANSACTION_DIRECTIVE,
        ),
        AnalysisResult::Block(block) => (RecordKind::Block, block_sections(block), BLOCK_DIRECTIVE),
    };
    let mut text = String::new();
    for section in &sections {
        section.render(&mut text);
    }
    FormattedContext {
        kind,
        text: text.trim_end().to_string(),
        directive: directive.to_string(),
    }
}

fn transaction_sections(a: &TransactionAnalysis) -> Vec<Section> {
    let o = &a.overview;
    let overview = Section::new(TRANSACTION_SECTIONS[0])
        .line("Hash", &o.hash)
        .line("Network", &o.network)
        .line("Block", &o.block_number)
        .line("Status", &o.status)
        .line("From", &o.from)
        .opt("To", o.to.as_deref())
        .line("Value", format!("{} {}", o.value_native, o.currency))
        .line("Fee", format!("{} {}", o.fee_native, o.currency))
        .line("Gas used / limit", format!("{} / {}", o.gas_used, o.gas_limit))
        .line("Gas efficiency", format!("{}%", o.gas_efficiency_pct))
        .line("Gas price", format!("{} gwei", o.gas_price_gwei))
        .opt("Age (seconds)", o.age_secs.as_deref())
        .opt("Contract", o.contract_name.as_deref())
        .opt(
            "Contract verified",
            o.contract_verified.map(|v| if v { "yes" } else { "no" }),
        );

    let c = &a.classification;
    let classification = if c.primary_type == "Unknown" {
        Section::new(TRANSACTION_SECTIONS[1])
    } else {
        Section::new(TRANSACTION_SECTIONS[1])
            .line("Primary type", &c.primary_type)
            .opt("Function", c.function_name.as_deref())
            .opt("Selector", c.selector.as_deref())
            .line("Token transfers", c.transfer_count)
            .line("Distinct tokens", c.token_count)
            .line("Contract interactions", c.interaction_count)
            .line("Event logs", c.log_count)
    };

    let complexity = Section::new(TRANSACTION_SECTIONS[3])
        .line("Score", format!("{}/100", a.complexity.score))
        .line("Level", a.complexity.level.as_str());

    let clustering = if a.clustering.confidence > 0.0 {
        Section::new(TRANSACTION_SECTIONS[4])
            .line("Label", &a.clustering.label)
            .line("Confidence", format!("{:.0}%", a.clustering.confidence * 100.0))
    } else {
        Section::new(TRANSACTION_SECTIONS[4])
    };

    let t = &a.trading_patterns;
    let trading = Section::new(TRANSACTION_SECTIONS[6])
        .line("Automation", &t.automation_level)
        .line("Sophistication", &t.sophistication)
        .line("Primary strategy", &t.primary_strategy)
        .line(
            "Detected strategies",
            if t.detected_strategies.is_empty() {
                "none".to_string()
            } else {
                t.detected_strategies.join(", ")
            },
        );

    let l = &a.liquidity_metrics;
    let liquidity = if l.net_flow == "Unknown" {
        Section::new(TRANSACTION_SECTIONS[7])
    } else {
        l.token_flows.iter().fold(
            Section::new(TRANSACTION_SECTIONS[7])
                .line("Native value", format!("{} {}", l.native_value, o.currency))
                .line("Token transfers", l.token_transfer_count)
                .line("Distinct tokens", l.distinct_tokens)
                .line("Counterparties", l.unique_counterparties)
                .line("Net flow for sender", &l.net_flow),
            |section, flow| {
                section.raw(format!(
                    "- {}: sent {}, received {}",
                    flow.symbol.as_deref().unwrap_or(&flow.token),
                    flow.sent_by_sender,
                    flow.received_by_sender
                ))
            },
        )
    };

    vec![
        overview,
        classification,
        risk_section(TRANSACTION_SECTIONS[2], &a.risk),
        complexity,
        clustering,
        mev_section(TRANSACTION_SECTIONS[5], &a.mev_indicators),
        trading,
        liquidity,
    ]
}

fn block_sections(a: &BlockAnalysis) -> Vec<Section> {
    let o = &a.overview;
    let overview = Section::new(BLOCK_SECTIONS[0])
        .line("Number", &o.number)
        .line("Hash", &o.hash)
        .line("Network", &o.network)
        .line("Miner", &o.miner)
        .line("Timestamp", &o.timestamp)
        .opt("Age (seconds)", o.age_secs.as_deref())
        .line("Transactions", &o.transaction_count)
        .line("Gas used / limit", format!("{} / {}", o.gas_used, o.gas_limit))
        .line("Size (bytes)", &o.size_bytes);

    let h = &a.network_health;
    let health = Section::new(BLOCK_SECTIONS[1])
        .line("Utilization", format!("{}%", h.utilization_pct))
        .line("Congestion", format!("{:?}", h.congestion))
        .opt("Base fee (gwei)", h.base_fee_gwei.as_deref())
        .line("Fee pressure", format!("{:?}", h.fee_pressure))
        .opt("Seconds since parent", h.block_interval_secs.as_deref())
        .opt("Blocks behind chain head", h.indexing_lag_blocks.as_deref())
        .line("Status", format!("{:?}", h.status));

    let act = &a.activity;
    let activity = if act.sampled == 0 {
        Section::new(BLOCK_SECTIONS[2])
    } else {
        Section::new(BLOCK_SECTIONS[2])
            .line("Transactions in block", &act.transaction_count)
            .line("Sampled", act.sampled)
            .line("Contract interactions", format!("{}%", act.contract_interaction_ratio_pct))
            .line("Failed in sample", act.failed_in_sample)
            .line("Sample value", &act.sample_value_native)
            .opt("Average gas price (gwei)", act.avg_gas_price_gwei.as_deref())
    };

    vec![
        overview,
        health,
        activity,
        breakdown_section(BLOCK_SECTIONS[3], &a.classification_breakdown),
        breakdown_section(BLOCK_SECTIONS[4], &a.cluster_breakdown),
        mev_section(BLOCK_SECTIONS[5], &a.mev_indicators),
        risk_section(BLOCK_SECTIONS[6], &a.risk),
    ]
}

fn risk_section(title: &'static str, risk: &RiskAssessment) -> Section {
    let section = Section::new(title)
        .line("Score", format!("{}/100", risk.score))
        .line("Level", risk.level.as_str());
    if risk.factors.is_empty() {
        return section.line("Factors", "none");
    }
    risk.factors
        .iter()
        .fold(section, |s, factor| s.raw(format!("- {}", factor)))
}

fn mev_section(title: &'static str, indicators: &[MevIndicator]) -> Section {
    if indicators.is_empty() {
        return Section::new(title).raw("None detected".to_string());
    }
    indicators.iter().fold(Section::new(title), |s, m| {
        let subject = m
            .tx_hash
            .as_deref()
            .map(|h| format!(" [{}]", h))
            .unwrap_or_default();
        s.raw(format!(
            "- {} ({:?}, confidence {:.0}%){}: {}",
            m.indicator_type,
            m.severity,
            m.confidence * 100.0,
            subject,
            m.description
        ))
    })
}

fn breakdown_section(title: &'static str, counts: &BTreeMap<String, usize>) -> Section {
    let mut sorted: Vec<_> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    sorted
        .into_iter()
        .fold(Section::new(title), |s, (label, count)| s.line(label, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fixtures::*;
    use crate::analysis::AnalysisEngine;

    fn titles(text: &str) -> Vec<&str> {
        text.lines()
            .filter_map(|l| l.strip_prefix("=== ").and_then(|l| l.strip_suffix(" ===")))
            .collect()
    }

    #[test]
    fn transaction_sections_in_fixed_order() {
        let result = AnalysisEngine::default().analyze(&crate::models::Record::Transaction(swap_tx()), &ctx());
        let formatted = format(&result);
        assert_eq!(formatted.kind, RecordKind::Transaction);
        assert_eq!(titles(&formatted.text), TRANSACTION_SECTIONS);
        assert!(formatted.text.contains("Primary type: Token Swap"));
        assert!(formatted.directive.contains("```mermaid"));
    }

    #[test]
    fn missing_fields_render_the_sentinel() {
        let mut tx = plain_tx();
        tx.to = None;
        tx.input_data = "0x6080".to_string();
        let result = AnalysisEngine::default().analyze(&crate::models::Record::Transaction(tx), &ctx());
        let text = format(&result).text;
        assert!(text.contains(&format!("To: {}", NO_DATA)));
        assert!(text.contains(&format!("Contract: {}", NO_DATA)));
        assert!(text.contains("None detected"));
    }

    #[test]
    fn unreadable_analysis_keeps_its_sections() {
        let mut tx = plain_tx();
        tx.value = "bogus".to_string();
        let result = AnalysisEngine::default().analyze(&crate::models::Record::Transaction(tx), &ctx());
        let text = format(&result).text;
        assert_eq!(titles(&text), TRANSACTION_SECTIONS);
        assert!(text.contains(&format!("=== CLASSIFICATION ===\n{}", NO_DATA)));
        assert!(text.contains(&format!("=== LIQUIDITY ===\n{}", NO_DATA)));
    }

    #[test]
    fn block_sections_and_empty_sample() {
        let engine = AnalysisEngine::default();
        let full = format(&engine.analyze(&crate::models::Record::Block(block(vec![plain_tx(), swap_tx()])), &ctx()));
        assert_eq!(full.kind, RecordKind::Block);
        assert_eq!(titles(&full.text), BLOCK_SECTIONS);
        assert!(full.text.contains("Simple Transfer: 1"));

        let empty = format(&engine.analyze(&crate::models::Record::Block(block(vec![])), &ctx()));
        assert!(empty.text.contains(&format!("=== ACTIVITY ===\n{}", NO_DATA)));
        assert!(empty.text.contains(&format!("=== TRANSACTION TYPES ===\n{}", NO_DATA)));
    }
}
