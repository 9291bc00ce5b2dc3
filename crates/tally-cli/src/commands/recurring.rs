//! Recurring payment report

use anyhow::Result;
use tally_core::config::TallyConfig;
use tally_core::db::Database;
use tally_core::models::Trend;
use tally_core::recurring::RecurringAnalyzer;

use super::truncate;

pub fn cmd_recurring(db: &Database, config: &TallyConfig, json: bool) -> Result<()> {
    let analyzer = RecurringAnalyzer::new(db.clone(), config.recurring.clone(), config.history_ttl);
    let (patterns, insights) = analyzer.insights()?;

    if json {
        let output = serde_json::json!({
            "patterns": patterns,
            "insights": insights,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if patterns.is_empty() {
        println!("No recurring payments detected yet.");
        println!(
            "  Recurring charges need at least {} consecutive months of history.",
            config.recurring.min_consecutive_months
        );
        return Ok(());
    }

    println!();
    println!("🔁 Recurring Payments");
    println!("   ─────────────────────────────────────────────────────────────");

    for pattern in &patterns {
        let trend_icon = match pattern.trend {
            Trend::Increasing => "📈",
            Trend::Decreasing => "📉",
            Trend::Stable => "  ",
        };
        println!(
            "   {} {:20} │ {:>12}/mo │ {:9} │ {:>2} months │ {:10} │ {:.2}",
            trend_icon,
            truncate(&pattern.display_merchant, 20),
            format!("₹{:.2}", pattern.monthly_equivalent),
            pattern.frequency.as_str(),
            pattern.consecutive_months,
            pattern.service_tag.as_str(),
            pattern.confidence
        );
    }

    println!();
    println!(
        "   Total: ₹{:.2}/mo across {} payments",
        insights.total_monthly_spend, insights.total_recurring_count
    );
    println!("   {}", insights.insight_text);
    if let Some(suggestion) = &insights.savings_suggestion {
        println!();
        println!("💸 {}", suggestion);
        println!("   Potential savings: ₹{:.2}/mo", insights.potential_savings);
    }

    Ok(())
}
