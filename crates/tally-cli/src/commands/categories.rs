//! Category command implementations

use anyhow::Result;
use tally_core::db::Database;

use super::truncate;

pub fn cmd_categories_list(db: &Database) -> Result<()> {
    let categories = db.list_categories()?;

    if categories.is_empty() {
        println!("No categories found. Seed the defaults with:");
        println!("  tally init");
        return Ok(());
    }

    println!();
    println!("🏷️  Categories");
    println!("   ─────────────────────────────────────────────────────────────");

    for category in categories {
        let status_icon = if category.is_active { "✅" } else { "🚫" };
        let keywords: Vec<&str> = category.keywords.iter().map(String::as_str).collect();
        println!(
            "   {} {:16} │ {:20} │ {}",
            status_icon,
            category.id,
            truncate(&category.name, 20),
            truncate(&keywords.join(", "), 40)
        );
        if !category.learned_keywords.is_empty() {
            let learned: Vec<&str> = category
                .learned_keywords
                .iter()
                .map(String::as_str)
                .collect();
            println!("      🧠 learned: {}", learned.join(", "));
        }
    }

    Ok(())
}

pub fn cmd_categories_add(db: &Database, name: &str, keywords: &[String]) -> Result<()> {
    let category = db.add_category(name, keywords)?;

    println!("✅ Category '{}' ({})", category.name, category.id);
    if !category.keywords.is_empty() {
        let keywords: Vec<&str> = category.keywords.iter().map(String::as_str).collect();
        println!("   Keywords: {}", keywords.join(", "));
    }

    Ok(())
}

pub fn cmd_categories_deactivate(db: &Database, id: &str) -> Result<()> {
    db.deactivate_category(id)?;
    println!("🚫 Deactivated category '{}'", id);
    println!("   Existing transactions keep it; new messages will not match it.");
    Ok(())
}
