//! Labor-hour estimator (§4.6): aggregates per-author commit counts into
//! estimated hours, with an optional README marker override.

use chrono::{DateTime, Utc};

use codecat_types::{AuthorSummary, LaborSummary};

/// Default hours credited per commit when `HOURS_PER_COMMIT` is unset,
/// matching the original tool's estimator default.
pub const DEFAULT_HOURS_PER_COMMIT: f64 = 0.5;

/// One commit record as a platform adapter's pagination yields it.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub author_name: String,
    pub author_email: String,
    pub committed_at: DateTime<Utc>,
}

/// Aggregate `commits` by `(author_name, author_email)`, crediting
/// `hours_per_commit` hours to each commit.
pub fn estimate_labor(commits: &[CommitRecord], hours_per_commit: f64) -> LaborSummary {
    let mut summary = LaborSummary::default();
    for commit in commits {
        let key = (commit.author_name.clone(), commit.author_email.clone());
        let entry = summary.by_author.entry(key).or_insert_with(AuthorSummary::default);
        entry.commits += 1;
        entry.estimated_hours += hours_per_commit;
        entry.first_commit = Some(match entry.first_commit {
            Some(existing) if existing <= commit.committed_at => existing,
            _ => commit.committed_at,
        });
        entry.last_commit = Some(match entry.last_commit {
            Some(existing) if existing >= commit.committed_at => existing,
            _ => commit.committed_at,
        });
    }
    summary
}

/// Final `laborHours` value for a record: the README's explicit marker
/// wins outright when present, otherwise the aggregated commit-based
/// estimate (rounded to one decimal, matching the original's display
/// precision).
pub fn resolve_labor_hours(readme_marker_hours: Option<f64>, aggregated: &LaborSummary) -> f64 {
    match readme_marker_hours {
        Some(hours) => hours,
        None => (aggregated.total_hours() * 10.0).round() / 10.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn aggregates_per_author_email_pair() {
        let commits = vec![
            CommitRecord {
                author_name: "Ada".into(),
                author_email: "ada@example.gov".into(),
                committed_at: dt(2024, 1, 1),
            },
            CommitRecord {
                author_name: "Ada".into(),
                author_email: "ada@example.gov".into(),
                committed_at: dt(2024, 3, 1),
            },
            CommitRecord {
                author_name: "Grace".into(),
                author_email: "grace@example.gov".into(),
                committed_at: dt(2024, 2, 1),
            },
        ];
        let summary = estimate_labor(&commits, 0.5);
        assert_eq!(summary.by_author.len(), 2);
        let ada = &summary.by_author[&("Ada".to_string(), "ada@example.gov".to_string())];
        assert_eq!(ada.commits, 2);
        assert_eq!(ada.estimated_hours, 1.0);
        assert_eq!(ada.first_commit, Some(dt(2024, 1, 1)));
        assert_eq!(ada.last_commit, Some(dt(2024, 3, 1)));
    }

    #[test]
    fn total_hours_sums_across_authors() {
        let commits = vec![
            CommitRecord {
                author_name: "Ada".into(),
                author_email: "ada@example.gov".into(),
                committed_at: dt(2024, 1, 1),
            },
            CommitRecord {
                author_name: "Grace".into(),
                author_email: "grace@example.gov".into(),
                committed_at: dt(2024, 2, 1),
            },
        ];
        let summary = estimate_labor(&commits, 0.5);
        assert_eq!(summary.total_hours(), 1.0);
    }

    #[test]
    fn readme_marker_overrides_aggregated_estimate() {
        let summary = LaborSummary::default();
        assert_eq!(resolve_labor_hours(Some(120.0), &summary), 120.0);
    }

    #[test]
    fn no_marker_falls_back_to_rounded_aggregate() {
        let commits = vec![CommitRecord {
            author_name: "Ada".into(),
            author_email: "ada@example.gov".into(),
            committed_at: dt(2024, 1, 1),
        }];
        let summary = estimate_labor(&commits, 0.33);
        assert_eq!(resolve_labor_hours(None, &summary), 0.3);
    }

    #[test]
    fn empty_commit_list_yields_zero_hours() {
        let summary = estimate_labor(&[], 0.5);
        assert_eq!(resolve_labor_hours(None, &summary), 0.0);
    }
}
