//! History Store (C3): append-only retrieval with persona filtering,
//! consecutive-dedup, and soft char-budget trimming (§4.3).

use rusqlite::params;

use crate::error::Result;
use crate::manager::Store;
use crate::types::{HistoryItem, HistoryRole};

impl Store {
    /// Fetches recent conversation history for a chat, merged and sorted
    /// ascending by time, ready to embed in an upstream request's
    /// `context.history[]`.
    pub fn fetch_recent(
        &self,
        chat_id: i64,
        limit_pairs: i64,
        persona: Option<&str>,
        soft_char_limit: Option<usize>,
        soft_head: usize,
        soft_tail: usize,
    ) -> Result<Vec<HistoryItem>> {
        let user_limit = limit_pairs * 4;
        let assistant_limit = limit_pairs * 8;

        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT text, created_at FROM messages WHERE chat_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let mut user_rows: Vec<HistoryItem> = stmt
                .query_map(params![chat_id, user_limit], |row| {
                    Ok(HistoryItem {
                        role: HistoryRole::User,
                        text: row.get(0)?,
                        created_at: crate::manager::parse_dt(row.get(1)?),
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;

            let mut stmt = conn.prepare_cached(
                "SELECT text, meta_json, created_at FROM assistant_messages WHERE chat_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let assistant_rows: Vec<(HistoryItem, Option<String>)> = stmt
                .query_map(params![chat_id, assistant_limit], |row| {
                    let meta_raw: String = row.get(1)?;
                    let meta: serde_json::Value =
                        serde_json::from_str(&meta_raw).unwrap_or(serde_json::Value::Null);
                    let row_persona = meta
                        .get("persona")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    Ok((
                        HistoryItem {
                            role: HistoryRole::Assistant,
                            text: row.get(0)?,
                            created_at: crate::manager::parse_dt(row.get(2)?),
                        },
                        row_persona,
                    ))
                })?
                .collect::<rusqlite::Result<_>>()?;

            let mut merged = Vec::with_capacity(user_rows.len() + assistant_rows.len());
            merged.append(&mut user_rows);
            for (item, row_persona) in assistant_rows {
                // "rows without a persona key are included" — only a
                // present-and-mismatched persona excludes a row.
                if let (Some(wanted), Some(got)) = (persona, row_persona.as_deref()) {
                    if wanted != got {
                        continue;
                    }
                }
                merged.push(item);
            }
            Ok(merged)
        })?;

        Ok(trim_history(
            raw,
            limit_pairs,
            soft_char_limit,
            soft_head,
            soft_tail,
        ))
    }
}

/// Pure post-processing: sort ascending, keep the last `2*limit_pairs`,
/// drop consecutive identical `(role, text)` duplicates, then soft-trim
/// by character budget.
fn trim_history(
    mut items: Vec<HistoryItem>,
    limit_pairs: i64,
    soft_char_limit: Option<usize>,
    soft_head: usize,
    soft_tail: usize,
) -> Vec<HistoryItem> {
    items.sort_by_key(|i| i.created_at);

    let keep = (2 * limit_pairs).max(0) as usize;
    if items.len() > keep {
        items = items.split_off(items.len() - keep);
    }

    let mut deduped: Vec<HistoryItem> = Vec::with_capacity(items.len());
    for item in items {
        let is_dup = deduped
            .last()
            .map(|prev| prev.role == item.role && prev.text == item.text)
            .unwrap_or(false);
        if !is_dup {
            deduped.push(item);
        }
    }

    let Some(limit) = soft_char_limit else {
        return deduped;
    };
    let total_chars: usize = deduped.iter().map(|i| i.text.chars().count()).sum();
    if total_chars <= limit || deduped.len() <= 2 {
        return deduped;
    }

    soft_trim(deduped, soft_head, soft_tail)
}

/// Keeps a head slice accumulating at most `soft_head` chars and a tail
/// slice accumulating at most `soft_tail` chars, dropping the middle. If
/// head and tail would overlap (the conversation is too short to split
/// cleanly), returns the items unchanged rather than risk duplicating or
/// losing a message.
fn soft_trim(items: Vec<HistoryItem>, soft_head: usize, soft_tail: usize) -> Vec<HistoryItem> {
    let n = items.len();

    let mut head_end = 0;
    let mut head_chars = 0;
    while head_end < n {
        let next_chars = head_chars + items[head_end].text.chars().count();
        if head_end > 0 && next_chars > soft_head {
            break;
        }
        head_chars = next_chars;
        head_end += 1;
    }

    let mut tail_start = n;
    let mut tail_chars = 0;
    while tail_start > 0 {
        let next_chars = tail_chars + items[tail_start - 1].text.chars().count();
        if tail_start < n && next_chars > soft_tail {
            break;
        }
        tail_chars = next_chars;
        tail_start -= 1;
    }

    if head_end >= tail_start {
        return items;
    }

    let mut out = Vec::with_capacity(head_end + (n - tail_start));
    out.extend_from_slice(&items[..head_end]);
    out.extend_from_slice(&items[tail_start..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn item(role: HistoryRole, text: &str, offset_secs: i64) -> HistoryItem {
        HistoryItem {
            role,
            text: text.to_string(),
            created_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn keeps_last_n_pairs() {
        let items: Vec<HistoryItem> = (0..10)
            .map(|i| item(HistoryRole::User, &format!("m{i}"), i))
            .collect();
        let out = trim_history(items, 2, None, 0, 0);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].text, "m6");
        assert_eq!(out[3].text, "m9");
    }

    #[test]
    fn dedups_consecutive_identical_items() {
        let items = vec![
            item(HistoryRole::User, "hi", 0),
            item(HistoryRole::User, "hi", 1),
            item(HistoryRole::Assistant, "hello", 2),
        ];
        let out = trim_history(items, 50, None, 0, 0);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn soft_trims_when_over_budget() {
        let items: Vec<HistoryItem> = (0..10)
            .map(|i| item(HistoryRole::User, &"x".repeat(100), i))
            .collect();
        let out = trim_history(items, 50, Some(500), 200, 100);
        assert!(out.len() < 10);
        let total: usize = out.iter().map(|i| i.text.chars().count()).sum();
        assert!(total <= 300);
    }

    #[test]
    fn soft_trim_returns_unchanged_when_head_tail_overlap() {
        let items: Vec<HistoryItem> = (0..3)
            .map(|i| item(HistoryRole::User, &"x".repeat(50), i))
            .collect();
        let out = trim_history(items.clone(), 50, Some(10), 10, 10);
        assert_eq!(out.len(), items.len());
    }
}
