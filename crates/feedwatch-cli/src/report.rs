use crate::engine::{Finding, PostRef};
use feedwatch_mail::Message;
use std::fmt::Write as _;

pub const NO_RESULTS_SUBJECT: &str = "feedwatch: no results";

/// Hits of a single post.
#[derive(Debug, Default, PartialEq)]
struct PostHits<'a> {
    keywords: Vec<&'a str>,
    faces: Vec<(&'a str, f32)>,
}

/// Plain-text summary of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub subject: String,
    pub body: String,
    /// Posts with at least one hit.
    pub hit_posts: usize,
}

impl Report {
    /// Group hits by post in first-seen order. Unknown faces are not listed.
    pub fn from_findings(findings: &[Finding], searched: usize) -> Self {
        let mut grouped: Vec<(&PostRef, PostHits)> = Vec::new();

        for finding in findings.iter().filter(|f| f.is_hit()) {
            let post = finding.post();
            let index = match grouped.iter().position(|(p, _)| *p == post) {
                Some(i) => i,
                None => {
                    grouped.push((post, PostHits::default()));
                    grouped.len() - 1
                }
            };
            let hits = &mut grouped[index].1;
            match finding {
                Finding::Keyword { keyword, .. } => {
                    if !hits.keywords.contains(&keyword.as_str()) {
                        hits.keywords.push(keyword);
                    }
                }
                Finding::Face { identity, similarity, .. } => {
                    hits.faces.push((identity.label(), *similarity));
                }
            }
        }

        if grouped.is_empty() {
            return Self {
                subject: NO_RESULTS_SUBJECT.to_string(),
                body: format!("feedwatch searched {searched} posts and found no matching keywords or faces.\n"),
                hit_posts: 0,
            };
        }

        let mut body = format!(
            "feedwatch searched {searched} posts and found {} with matches.\n",
            grouped.len()
        );
        for (post, hits) in &grouped {
            let _ = write!(body, "\n{}\n", post.url);
            if !hits.keywords.is_empty() {
                let _ = writeln!(body, "  keywords: {}", hits.keywords.join(", "));
            }
            if !hits.faces.is_empty() {
                let faces: Vec<String> = hits
                    .faces
                    .iter()
                    .map(|(label, sim)| format!("{label} ({sim:.2})"))
                    .collect();
                let _ = writeln!(body, "  faces: {}", faces.join(", "));
            }
        }

        let subject = match grouped.len() {
            1 => "feedwatch: 1 post matched".to_string(),
            n => format!("feedwatch: {n} posts matched"),
        };
        Self { subject, body, hit_posts: grouped.len() }
    }

    pub fn has_hits(&self) -> bool {
        self.hit_posts > 0
    }

    pub fn into_message(self, to: impl Into<String>, from: impl Into<String>) -> Message {
        Message {
            to: to.into(),
            from: from.into(),
            subject: self.subject,
            body: self.body,
        }
    }
}
