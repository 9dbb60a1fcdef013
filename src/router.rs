//! Classification of inbound messages into archive, query and shutdown actions.
//!
//! `route` only decides. The worker carries out the returned [`Action`], so the
//! rules here can be tested without a gateway connection.

use archivist_core::error::QueryError;
use archivist_core::record::MessageEvent;
use archivist_storage::db::QueryOutput;

use crate::auth::OperatorSet;

/// Exact trimmed content that asks the service to stop.
pub const SHUTDOWN_COMMAND: &str = "!shutdown";
/// Leading character that marks the rest of the message as a SQL statement.
pub const QUERY_PREFIX: char = '\\';
pub const UNAUTHORIZED_QUERY_REPLY: &str = "You are not authorized to run SQL queries.";
pub const EMPTY_RESULT_REPLY: &str = "Query ran successfully, but no rows returned.";
/// Discord rejects messages longer than this many characters.
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

const FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    Reply(String),
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Noop,
    Shutdown { operator_id: u64 },
    /// Archive the message, then optionally answer it.
    Persist { followup: Option<Followup> },
}

pub fn route(event: &MessageEvent, operators: &OperatorSet, self_id: Option<u64>) -> Action {
    if event.author_is_bot || self_id == Some(event.author_id) {
        return Action::Noop;
    }

    let authorized = operators.is_authorized(event.author_id);

    // A non-operator's "!shutdown" is just an ordinary message.
    if event.content.trim() == SHUTDOWN_COMMAND && authorized {
        return Action::Shutdown {
            operator_id: event.author_id,
        };
    }

    let followup = event.content.strip_prefix(QUERY_PREFIX).map(|statement| {
        if authorized {
            Followup::Query(statement.trim().to_string())
        } else {
            Followup::Reply(UNAUTHORIZED_QUERY_REPLY.to_string())
        }
    });
    Action::Persist { followup }
}

pub fn shutdown_notice(operator_id: u64) -> String {
    format!("<@{operator_id}> Bot was shut down via Discord.")
}

pub fn format_query_reply(result: &Result<QueryOutput, QueryError>) -> String {
    let rows = match result {
        Err(e) => return e.to_string(),
        Ok(output) => output.rows(),
    };
    if rows.is_empty() {
        return EMPTY_RESULT_REPLY.to_string();
    }

    let lines: Vec<String> = rows
        .iter()
        .map(|row| {
            row.fields
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect();
    fenced(&lines)
}

fn fenced(lines: &[String]) -> String {
    format!("{FENCE}\n{}\n{FENCE}", lines.join("\n"))
}

fn truncate_chars(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut out: String = line.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn chunk_chars(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Split a reply so every piece fits in one Discord message.
///
/// Fenced replies are split between rows and every piece is fenced again;
/// a single row that cannot fit is truncated.
pub fn split_reply(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }
    let Some(body) = text
        .strip_prefix("```\n")
        .and_then(|rest| rest.strip_suffix("\n```"))
    else {
        return chunk_chars(text, limit);
    };

    let budget = limit.saturating_sub(FENCE.len() * 2 + 2).max(1);
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut used = 0;
    for line in body.lines() {
        let line = truncate_chars(line, budget);
        let len = line.chars().count();
        if !current.is_empty() && used + 1 + len > budget {
            chunks.push(fenced(&current));
            current.clear();
            used = 0;
        }
        used += len + usize::from(!current.is_empty());
        current.push(line);
    }
    if !current.is_empty() {
        chunks.push(fenced(&current));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_storage::db::{QueryRow, SqlValue};
    use chrono::Utc;

    const OPERATOR: u64 = 129413794660089869;
    const STRANGER: u64 = 555;

    fn operators() -> OperatorSet {
        OperatorSet::new([OPERATOR])
    }

    fn event(author_id: u64, content: &str) -> MessageEvent {
        MessageEvent {
            id: 1,
            guild_id: Some(9),
            guild_name: Some("guild".into()),
            channel_id: 10,
            channel_name: "general".into(),
            author_id,
            author_name: "someone".into(),
            author_is_bot: false,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    fn rows(n: usize) -> QueryOutput {
        QueryOutput::Rows {
            columns: vec!["id".into(), "name".into()],
            rows: (0..n)
                .map(|i| QueryRow {
                    fields: vec![
                        ("id".into(), SqlValue::Integer(i as i64)),
                        ("name".into(), SqlValue::Text(format!("n{i}"))),
                    ],
                })
                .collect(),
        }
    }

    #[test]
    fn test_plain_message_is_persisted_without_reply() {
        assert_eq!(
            route(&event(STRANGER, "hello"), &operators(), None),
            Action::Persist { followup: None }
        );
    }

    #[test]
    fn test_bot_and_self_messages_are_ignored() {
        let mut bot = event(STRANGER, "hello");
        bot.author_is_bot = true;
        assert_eq!(route(&bot, &operators(), None), Action::Noop);
        assert_eq!(
            route(&event(77, "hello"), &operators(), Some(77)),
            Action::Noop
        );
    }

    #[test]
    fn test_operator_shutdown_matches_trimmed_content() {
        assert_eq!(
            route(&event(OPERATOR, "  !shutdown\n"), &operators(), None),
            Action::Shutdown {
                operator_id: OPERATOR
            }
        );
    }

    #[test]
    fn test_shutdown_requires_exact_sentinel() {
        assert_eq!(
            route(&event(OPERATOR, "!shutdown now"), &operators(), None),
            Action::Persist { followup: None }
        );
    }

    #[test]
    fn test_non_operator_shutdown_falls_through_to_archive() {
        assert_eq!(
            route(&event(STRANGER, "!shutdown"), &operators(), None),
            Action::Persist { followup: None }
        );
    }

    #[test]
    fn test_operator_query_is_archived_and_executed() {
        assert_eq!(
            route(&event(OPERATOR, "\\SELECT 1 "), &operators(), None),
            Action::Persist {
                followup: Some(Followup::Query("SELECT 1".into()))
            }
        );
    }

    #[test]
    fn test_non_operator_query_is_rejected() {
        assert_eq!(
            route(&event(STRANGER, "\\SELECT 1"), &operators(), None),
            Action::Persist {
                followup: Some(Followup::Reply(UNAUTHORIZED_QUERY_REPLY.into()))
            }
        );
    }

    #[test]
    fn test_query_prefix_is_not_trimmed_first() {
        assert_eq!(
            route(&event(OPERATOR, " \\SELECT 1"), &operators(), None),
            Action::Persist { followup: None }
        );
    }

    #[test]
    fn test_shutdown_notice_mentions_operator() {
        assert_eq!(
            shutdown_notice(42),
            "<@42> Bot was shut down via Discord."
        );
    }

    #[test]
    fn test_format_single_row() {
        let output = QueryOutput::Rows {
            columns: vec!["1".into()],
            rows: vec![QueryRow {
                fields: vec![("1".into(), SqlValue::Integer(1))],
            }],
        };
        assert_eq!(format_query_reply(&Ok(output)), "```\n1: 1\n```");
    }

    #[test]
    fn test_format_rows_joined_in_column_order() {
        assert_eq!(
            format_query_reply(&Ok(rows(2))),
            "```\nid: 0 | name: n0\nid: 1 | name: n1\n```"
        );
    }

    #[test]
    fn test_format_empty_and_executed() {
        assert_eq!(format_query_reply(&Ok(rows(0))), EMPTY_RESULT_REPLY);
        assert_eq!(
            format_query_reply(&Ok(QueryOutput::Executed { affected: 3 })),
            EMPTY_RESULT_REPLY
        );
    }

    #[test]
    fn test_format_error_verbatim() {
        let err = QueryError::new("near \"SELEC\": syntax error");
        assert_eq!(
            format_query_reply(&Err(err)),
            "SQL Error: near \"SELEC\": syntax error"
        );
    }

    #[test]
    fn test_split_short_reply_untouched() {
        assert_eq!(split_reply("ok", 2000), vec!["ok".to_string()]);
    }

    #[test]
    fn test_split_fenced_reply_on_row_boundaries() {
        let lines: Vec<String> = (0..5).map(|i| format!("row {i}: {}", "x".repeat(10))).collect();
        let text = fenced(&lines);
        let chunks = split_reply(&text, 40);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40, "chunk too long: {chunk:?}");
            assert!(chunk.starts_with("```\n") && chunk.ends_with("\n```"));
        }
        let rejoined: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.trim_start_matches("```\n").trim_end_matches("\n```").lines())
            .collect();
        assert_eq!(rejoined.len(), 5);
    }

    #[test]
    fn test_split_truncates_oversized_row() {
        let text = fenced(&["y".repeat(100)]);
        let chunks = split_reply(&text, 30);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chars().count(), 30);
        assert!(chunks[0].contains('…'));
    }

    #[test]
    fn test_split_plain_text_by_chars() {
        let text = "é".repeat(25);
        let chunks = split_reply(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].chars().count(), 5);
    }
}
