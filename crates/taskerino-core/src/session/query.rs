//! Filtered session queries for external tools.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::Session;

/// Filters for `SessionRepository::query`. Every field is optional; an empty
/// query returns all sessions, newest first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionQuery {
    /// Matches screenshots whose detected activity contains any of these.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<Vec<String>>,
    /// Any keyword in name, description, notes, category or tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_blockers: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_achievements: Option<bool>,
    /// Sessions starting at or after this instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    /// Sessions ending at or before this instant. Open sessions pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Lifecycle status as written by the UI (`active`, `paused`, `completed`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQueryResult {
    pub sessions: Vec<Session>,
    /// Matches before `limit` was applied.
    pub total: usize,
    pub elapsed_ms: u64,
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `aiAnalysis` objects of every screenshot in the session.
fn analyses(session: &Session) -> impl Iterator<Item = &Value> {
    session
        .screenshots
        .iter()
        .filter_map(|shot| shot.extra.get("aiAnalysis"))
}

fn has_progress_items(session: &Session, key: &str) -> bool {
    analyses(session).any(|analysis| {
        analysis
            .pointer(&format!("/progressIndicators/{}", key))
            .and_then(Value::as_array)
            .is_some_and(|items| !items.is_empty())
    })
}

impl SessionQuery {
    pub fn session_has_blockers(session: &Session) -> bool {
        session
            .summary
            .as_ref()
            .is_some_and(|s| !s.blockers.is_empty())
            || has_progress_items(session, "blockers")
    }

    pub fn session_has_achievements(session: &Session) -> bool {
        session
            .summary
            .as_ref()
            .is_some_and(|s| !s.achievements.is_empty())
            || has_progress_items(session, "achievements")
    }

    pub fn matches(&self, session: &Session) -> bool {
        if let Some(status) = &self.status {
            let session_status = session.extra.get("status").and_then(Value::as_str);
            if session_status != Some(status.as_str()) {
                return false;
            }
        }

        if let Some(start_date) = self.start_date {
            match session.start_time_utc() {
                Some(start) if start >= start_date => {}
                _ => return false,
            }
        }

        if let Some(end_date) = self.end_date {
            let end = session.end_time.as_deref().and_then(parse_time);
            if end.is_some_and(|end| end > end_date) {
                return false;
            }
        }

        if let Some(keywords) = &self.keywords {
            let description = session.extra.get("description").and_then(Value::as_str);
            let haystack = [
                Some(session.name.as_str()),
                description,
                session.notes.as_deref(),
                session.category.as_deref(),
                session.sub_category.as_deref(),
            ]
            .into_iter()
            .flatten()
            .chain(session.tags.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

            if !keywords.iter().any(|k| haystack.contains(&k.to_lowercase())) {
                return false;
            }
        }

        if let Some(activities) = &self.activity {
            let wanted: Vec<String> = activities.iter().map(|a| a.to_lowercase()).collect();
            let found = analyses(session)
                .filter_map(|a| a.get("detectedActivity").and_then(Value::as_str))
                .any(|detected| {
                    let detected = detected.to_lowercase();
                    wanted.iter().any(|w| detected.contains(w.as_str()))
                });
            if !found {
                return false;
            }
        }

        if self
            .has_blockers
            .is_some_and(|want| want != Self::session_has_blockers(session))
        {
            return false;
        }
        if self
            .has_achievements
            .is_some_and(|want| want != Self::session_has_achievements(session))
        {
            return false;
        }

        true
    }

    /// Filters, sorts newest first and truncates to `limit`.
    ///
    /// # Returns
    ///
    /// The matching sessions; `total` counts matches before truncation and
    /// `elapsed_ms` is left at zero for the caller to fill in.
    pub fn apply(&self, sessions: Vec<Session>) -> SessionQueryResult {
        let mut matched: Vec<Session> = sessions.into_iter().filter(|s| self.matches(s)).collect();
        matched.sort_by(|a, b| b.start_time_utc().cmp(&a.start_time_utc()));

        let total = matched.len();
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        SessionQueryResult {
            sessions: matched,
            total,
            elapsed_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionSummaryNarrative;
    use chrono::Duration;
    use serde_json::json;

    fn session(id: &str, days_ago: i64) -> Session {
        Session::new(id, format!("Session {}", id), Utc::now() - Duration::days(days_ago))
    }

    fn with_screenshot(mut session: Session, analysis: Value) -> Session {
        let shot = json!({
            "id": format!("{}-shot", session.id),
            "attachmentId": "att",
            "timestamp": session.start_time,
            "aiAnalysis": analysis
        });
        session.screenshots.push(serde_json::from_value(shot).unwrap());
        session
    }

    #[test]
    fn test_empty_query_returns_everything_newest_first() {
        let result = SessionQuery::default().apply(vec![session("a", 3), session("b", 1)]);
        assert_eq!(result.total, 2);
        assert_eq!(result.sessions[0].id, "b");
    }

    #[test]
    fn test_blockers_from_summary_or_screenshots() {
        let mut summarized = session("summarized", 1);
        summarized.summary = Some(SessionSummaryNarrative {
            narrative: "Stuck on CI".into(),
            blockers: vec!["flaky test".into()],
            ..Default::default()
        });
        let analysed = with_screenshot(
            session("analysed", 2),
            json!({"progressIndicators": {"blockers": [], "achievements": ["merged PR"]}}),
        );
        let plain = session("plain", 3);

        let blocked = SessionQuery {
            has_blockers: Some(true),
            ..Default::default()
        }
        .apply(vec![summarized.clone(), analysed.clone(), plain.clone()]);
        assert_eq!(blocked.sessions.len(), 1);
        assert_eq!(blocked.sessions[0].id, "summarized");

        let unblocked = SessionQuery {
            has_blockers: Some(false),
            has_achievements: Some(true),
            ..Default::default()
        }
        .apply(vec![summarized, analysed, plain]);
        assert_eq!(unblocked.sessions.len(), 1);
        assert_eq!(unblocked.sessions[0].id, "analysed");
    }

    #[test]
    fn test_activity_keywords_and_status() {
        let mut coding = with_screenshot(
            session("coding", 1),
            json!({"detectedActivity": "Coding in VS Code"}),
        );
        coding.tags = vec!["auth".into()];
        coding.extra.insert("status".into(), json!("completed"));
        let mut meeting = with_screenshot(
            session("meeting", 2),
            json!({"detectedActivity": "Video meeting"}),
        );
        meeting.extra.insert("status".into(), json!("active"));

        let query = SessionQuery {
            activity: Some(vec!["coding".into()]),
            keywords: Some(vec!["AUTH".into(), "billing".into()]),
            status: Some("completed".into()),
            ..Default::default()
        };
        assert!(query.matches(&coding));
        assert!(!query.matches(&meeting));
    }

    #[test]
    fn test_date_range_and_limit() {
        let now = Utc::now();
        let mut finished = session("finished", 5);
        finished.end_time = Some((now - Duration::days(4)).to_rfc3339());
        let open = session("open", 1);
        let old = session("old", 30);

        let result = SessionQuery {
            start_date: Some(now - Duration::days(10)),
            end_date: Some(now - Duration::days(2)),
            limit: Some(1),
            ..Default::default()
        }
        .apply(vec![finished, open, old]);

        assert_eq!(result.total, 2);
        assert_eq!(result.sessions.len(), 1);
        assert_eq!(result.sessions[0].id, "open");
    }

    #[test]
    fn test_filters_deserialize_from_camel_case() {
        let query: SessionQuery =
            serde_json::from_value(json!({"hasBlockers": true, "activity": ["coding"]})).unwrap();
        assert_eq!(query.has_blockers, Some(true));
        assert_eq!(query.activity, Some(vec!["coding".to_string()]));
        assert!(query.limit.is_none());
    }
}
