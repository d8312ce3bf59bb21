//! Status badge: per-version test and delivery status rendered as SVG.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::models::test_result::{TestResult, TestStatus};
use crate::models::version::Version;
use crate::services::version_resolver;
use crate::store::{Store, StoreError};

const HEIGHT: u32 = 20;
const HSPACE: u32 = 5;
const VERSION_WIDTH: u32 = 40;
const VERSION_TEXT_OFFSET: u32 = 18;
const DELIVERY_WIDTH: u32 = 50;
const DELIVERY_OVERLAP: u32 = 5;
const DELIVERY_TEXT_OFFSET: u32 = 25;
const TEST_WIDTH: u32 = 40;
const TEST_TEXT_OFFSET: u32 = 18;
const SEGMENT_WIDTH: u32 = VERSION_WIDTH + DELIVERY_WIDTH + TEST_WIDTH - DELIVERY_OVERLAP;

/// Test column of a badge segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeTestStatus {
    Pass,
    Failed,
    Error,
    /// Nothing recorded for the version yet.
    NotFound,
}

impl BadgeTestStatus {
    fn label(self) -> &'static str {
        match self {
            Self::Pass => "Pass",
            Self::Failed => "Fail",
            Self::Error => "Error",
            Self::NotFound => "To do",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Pass => "#00b300",
            Self::Failed => "#ff9933",
            Self::Error => "#ff4d4d",
            Self::NotFound => "#c266ff",
        }
    }
}

impl From<TestStatus> for BadgeTestStatus {
    fn from(status: TestStatus) -> Self {
        match status {
            TestStatus::Pass => Self::Pass,
            TestStatus::Failed => Self::Failed,
            TestStatus::Error => Self::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    OnTime,
    Delayed,
}

impl DeliveryStatus {
    fn label(self) -> &'static str {
        match self {
            Self::OnTime => "On time",
            Self::Delayed => "Delayed",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::OnTime => "#005ce6",
            Self::Delayed => "#cc00cc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionStatus {
    pub version_name: String,
    pub test: BadgeTestStatus,
    pub delivery: DeliveryStatus,
}

/// Status of each version window from the recorded results.
///
/// The best recorded status wins (PASS over FAILED over ERROR). A passing
/// version is late when its first pass came after `date_to`; any other version
/// is late once `date_to` has gone by.
pub fn version_statuses(
    versions: &[Version],
    results: &[TestResult],
    now: DateTime<Utc>,
) -> Vec<VersionStatus> {
    versions
        .iter()
        .map(|version| {
            let recorded: Vec<(&TestResult, TestStatus)> = results
                .iter()
                .filter(|r| {
                    r.semester_name == version.semester_name
                        && r.version_name == version.version_name
                })
                .filter_map(|r| r.status().map(|s| (r, s)))
                .collect();

            let best = recorded.iter().map(|(_, s)| *s).max();
            let delivery = match best {
                Some(TestStatus::Pass) => {
                    let first_pass = recorded
                        .iter()
                        .filter(|(_, s)| *s == TestStatus::Pass)
                        .map(|(r, _)| r.date_run)
                        .min();
                    match first_pass {
                        Some(at) if at > version.date_to => DeliveryStatus::Delayed,
                        _ => DeliveryStatus::OnTime,
                    }
                }
                _ if now > version.date_to => DeliveryStatus::Delayed,
                _ => DeliveryStatus::OnTime,
            };

            VersionStatus {
                version_name: version.version_name.clone(),
                test: best.map_or(BadgeTestStatus::NotFound, BadgeTestStatus::from),
                delivery,
            }
        })
        .collect()
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn label(out: &mut String, x: u32, text: &str) {
    out.push_str(&format!(
        "    <text x=\"{x}\" y=\"15\" fill=\"#010101\" fill-opacity=\".3\">{text}</text><text x=\"{x}\" y=\"14\">{text}</text>\n"
    ));
}

fn render_segment(out: &mut String, x: u32, status: &VersionStatus) {
    let x_delivery = x + VERSION_WIDTH;
    let x_test = x + VERSION_WIDTH + DELIVERY_WIDTH - DELIVERY_OVERLAP;

    out.push_str(&format!(
        "<rect rx=\"3\" x=\"{x}\" y=\"0\" width=\"{SEGMENT_WIDTH}\" height=\"{HEIGHT}\" fill=\"#595959\"/>\n"
    ));
    out.push_str(&format!(
        "<rect rx=\"3\" x=\"{x_test}\" y=\"0\" width=\"{TEST_WIDTH}\" height=\"{HEIGHT}\" fill=\"{}\"/>\n",
        status.test.color()
    ));
    out.push_str(&format!(
        "<rect rx=\"0\" x=\"{x_delivery}\" y=\"0\" width=\"{DELIVERY_WIDTH}\" height=\"{HEIGHT}\" fill=\"{}\"/>\n",
        status.delivery.color()
    ));
    out.push_str(
        "<g fill=\"#fff\" text-anchor=\"middle\" font-family=\"DejaVu Sans,Verdana,Geneva,sans-serif\" font-size=\"11\">\n",
    );
    label(out, x + VERSION_TEXT_OFFSET, &escape_xml(&status.version_name));
    label(out, x + VERSION_WIDTH + DELIVERY_TEXT_OFFSET, status.delivery.label());
    label(
        out,
        x + VERSION_WIDTH + DELIVERY_WIDTH + TEST_TEXT_OFFSET,
        status.test.label(),
    );
    out.push_str("</g>\n");
}

/// One segment per version, laid out left to right.
pub fn render_svg(statuses: &[VersionStatus]) -> String {
    let mut segments = String::new();
    let mut x = 0;
    for status in statuses {
        render_segment(&mut segments, x, status);
        x += SEGMENT_WIDTH + HSPACE;
    }
    let width = x.saturating_sub(HSPACE);

    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{HEIGHT}\">\n"
    );
    svg.push_str("<linearGradient id=\"a\" x2=\"0\" y2=\"100%\">\n");
    svg.push_str("    <stop offset=\"0\" stop-color=\"#bbb\" stop-opacity=\".1\"/>\n");
    svg.push_str("    <stop offset=\"1\" stop-opacity=\".1\"/>\n");
    svg.push_str("</linearGradient>\n\n");
    svg.push_str(&segments);
    svg.push_str("</svg>");
    svg
}

/// Badge for a repository as of `now`. Unknown or unconfigured repositories get an empty badge.
pub async fn repository_badge(
    store: &dyn Store,
    git_username: &str,
    repository_name: &str,
    now: DateTime<Utc>,
) -> Result<String, StoreError> {
    let semester = store
        .find_repository(git_username, repository_name)
        .await?
        .and_then(|r| r.semester_name);
    let Some(semester) = semester else {
        return Ok(render_svg(&[]));
    };

    let versions = version_resolver::opened_versions(store, &semester, now).await?;
    let results = store
        .test_results_for_repository(git_username, repository_name)
        .await?;
    Ok(render_svg(&version_statuses(&versions, &results, now)))
}

/// Changes once a minute so intermediaries never serve a stale badge for long.
pub fn badge_etag(git_username: &str, repository_name: &str, now: DateTime<Utc>) -> String {
    let minute = now.format("%Y%m%d%H%M");
    let digest = Sha256::digest(format!("{git_username}/{repository_name}/{minute}").as_bytes());
    format!("\"{}\"", &hex::encode(digest)[..16])
}

pub fn badge_url(base_url: &str, git_username: &str, repository_name: &str) -> String {
    format!(
        "{}/svg/{git_username}/{repository_name}",
        base_url.trim_end_matches('/')
    )
}

fn badge_markdown(badge_url: &str) -> String {
    format!("[![Compilation Status]({badge_url})]({badge_url})")
}

/// README content with the badge inserted, or `None` when it is already there.
///
/// The badge goes below the leading headings when the README starts with one,
/// otherwise a heading is added on top.
pub fn readme_with_badge(
    current: Option<&str>,
    repository_name: &str,
    badge_url: &str,
) -> Option<String> {
    let markdown = badge_markdown(badge_url);
    let Some(current) = current else {
        return Some(format!(
            "# {repository_name}\n\n{markdown}\n\n\
             This repository is monitored by Compiler Tester for automatic compilation status.\n"
        ));
    };
    if current.contains(badge_url) {
        return None;
    }

    let mut lines: Vec<String> = current.split('\n').map(str::to_string).collect();
    if lines.first().is_some_and(|l| l.starts_with('#')) {
        let insert_at = lines
            .iter()
            .skip(1)
            .position(|l| !(l.starts_with('#') || l.trim().is_empty()))
            .map_or(lines.len(), |i| i + 1);
        lines.insert(insert_at, format!("\n{markdown}\n"));
        return Some(lines.join("\n"));
    }

    Some(format!(
        "# {repository_name}\n\n{markdown}\n\n{}",
        current.trim_start()
    ))
}
