//! Category operations: seeding, keyword learning, soft deactivation

use std::collections::BTreeSet;

use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

use super::{conversion_error, Database};
use crate::categorize::{default_categories, CUSTOM_CATEGORY_PRIORITY};
use crate::error::{Error, Result};
use crate::models::{Category, UNCATEGORIZED};

const CATEGORY_COLUMNS: &str = "id, name, keywords, learned_keywords, is_default, is_active, priority";

fn parse_keywords(idx: usize, raw: &str) -> rusqlite::Result<BTreeSet<String>> {
    serde_json::from_str(raw).map_err(|e| conversion_error(idx, e))
}

fn row_to_category(row: &Row) -> rusqlite::Result<Category> {
    let keywords: String = row.get(2)?;
    let learned: String = row.get(3)?;
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        keywords: parse_keywords(2, &keywords)?,
        learned_keywords: parse_keywords(3, &learned)?,
        is_default: row.get(4)?,
        is_active: row.get(5)?,
        priority: row.get(6)?,
    })
}

/// Turn a display name into a category id ("Pet Care" -> "pet_care")
pub fn category_slug(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn normalize_keywords<I, S>(keywords: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keywords
        .into_iter()
        .map(|k| k.as_ref().trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

impl Database {
    /// Seed the built-in categories (idempotent)
    pub fn seed_default_categories(&self) -> Result<usize> {
        let conn = self.conn()?;
        let mut inserted = 0;

        for category in default_categories() {
            let keywords = serde_json::to_string(&category.keywords)?;
            inserted += conn.execute(
                r#"
                INSERT OR IGNORE INTO categories (id, name, keywords, learned_keywords, is_default, is_active, priority)
                VALUES (?, ?, ?, '[]', 1, 1, ?)
                "#,
                params![category.id, category.name, keywords, category.priority],
            )?;
        }

        if inserted > 0 {
            info!("Seeded {} default categories", inserted);
        }
        Ok(inserted)
    }

    /// All categories, active or not, in evaluation order
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories ORDER BY priority, id",
            CATEGORY_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_category)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Categories the rule engine should consider
    pub fn get_active_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories WHERE is_active = 1 ORDER BY priority, id",
            CATEGORY_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_category)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Get a category by id
    pub fn get_category(&self, id: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                &format!("SELECT {} FROM categories WHERE id = ?", CATEGORY_COLUMNS),
                params![id],
                row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    /// Create a custom category
    ///
    /// Custom categories are evaluated before the defaults. Re-adding a
    /// deactivated category reactivates it and merges the keywords.
    pub fn add_category(&self, name: &str, keywords: &[String]) -> Result<Category> {
        let id = category_slug(name);
        if id.is_empty() {
            return Err(Error::InvalidData(format!("Invalid category name: {:?}", name)));
        }
        let keywords = normalize_keywords(keywords);

        if let Some(mut existing) = self.get_category(&id)? {
            existing.keywords.extend(keywords);
            existing.is_active = true;
            let conn = self.conn()?;
            conn.execute(
                "UPDATE categories SET keywords = ?, is_active = 1 WHERE id = ?",
                params![serde_json::to_string(&existing.keywords)?, id],
            )?;
            return Ok(existing);
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO categories (id, name, keywords, learned_keywords, is_default, is_active, priority)
            VALUES (?, ?, ?, '[]', 0, 1, ?)
            "#,
            params![
                id,
                name.trim(),
                serde_json::to_string(&keywords)?,
                CUSTOM_CATEGORY_PRIORITY
            ],
        )?;

        Ok(Category {
            id,
            name: name.trim().to_string(),
            keywords,
            learned_keywords: BTreeSet::new(),
            is_default: false,
            is_active: true,
            priority: CUSTOM_CATEGORY_PRIORITY,
        })
    }

    /// Soft-deactivate a category; the "others" sentinel cannot be deactivated
    pub fn deactivate_category(&self, id: &str) -> Result<()> {
        if id == UNCATEGORIZED {
            return Err(Error::InvalidData(
                "The uncategorized fallback cannot be deactivated".to_string(),
            ));
        }
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE categories SET is_active = 0 WHERE id = ?",
            params![id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Category {}", id)));
        }
        Ok(())
    }

    /// Merge learned keywords into a category's rule set
    ///
    /// Keywords already present are left alone, so repeating an update is a no-op.
    pub fn persist_keyword_update(&self, category_id: &str, keywords: &[String]) -> Result<()> {
        let mut category = self
            .get_category(category_id)?
            .ok_or_else(|| Error::NotFound(format!("Category {}", category_id)))?;

        let additions = normalize_keywords(keywords);
        category.keywords.extend(additions.iter().cloned());
        category.learned_keywords.extend(additions);

        let conn = self.conn()?;
        conn.execute(
            "UPDATE categories SET keywords = ?, learned_keywords = ? WHERE id = ?",
            params![
                serde_json::to_string(&category.keywords)?,
                serde_json::to_string(&category.learned_keywords)?,
                category_id
            ],
        )?;
        debug!("Persisted keywords for {}: {:?}", category_id, category.learned_keywords);
        Ok(())
    }

    /// Forget a learned keyword in every category except `keep_id`
    ///
    /// Built-in keywords of the default categories stay in place. Returns the
    /// ids of the categories that changed.
    pub fn remove_learned_keyword(&self, keyword: &str, keep_id: &str) -> Result<Vec<String>> {
        let keyword = keyword.trim().to_lowercase();
        let defaults = default_categories();
        let conn = self.conn()?;
        let mut changed = Vec::new();

        for mut category in self.list_categories()? {
            if category.id == keep_id || !category.learned_keywords.remove(&keyword) {
                continue;
            }
            let built_in = defaults
                .iter()
                .any(|d| d.id == category.id && d.keywords.contains(&keyword));
            if !built_in {
                category.keywords.remove(&keyword);
            }
            conn.execute(
                "UPDATE categories SET keywords = ?, learned_keywords = ? WHERE id = ?",
                params![
                    serde_json::to_string(&category.keywords)?,
                    serde_json::to_string(&category.learned_keywords)?,
                    category.id
                ],
            )?;
            debug!("Unlearned '{}' from {}", keyword, category.id);
            changed.push(category.id);
        }
        Ok(changed)
    }
}
