//! OPML Import Planner (§4.7). OPML XML lexing/serialisation is a non-goal —
//! this module only classifies already-parsed outline entries against the
//! current feed list into an idempotent, non-mutating plan.

use podliner_proto::model::canonicalize_url;
use podliner_proto::Library;
use std::collections::HashSet;

/// One `<outline>` entry as handed to the planner by the (out of scope)
/// OPML parser.
#[derive(Debug, Clone)]
pub struct OpmlEntry {
    pub title: String,
    pub xml_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanVerdict {
    New,
    Duplicate,
    Invalid,
}

#[derive(Debug, Clone)]
pub struct PlannedEntry {
    pub title: String,
    pub url: Option<String>,
    pub verdict: PlanVerdict,
    /// Set when `update_titles` is requested and this entry's existing
    /// title differs from the OPML title.
    pub title_update: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub entries: Vec<PlannedEntry>,
}

impl ImportPlan {
    pub fn new_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.verdict == PlanVerdict::New)
            .count()
    }

    pub fn duplicate_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.verdict == PlanVerdict::Duplicate)
            .count()
    }

    pub fn invalid_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.verdict == PlanVerdict::Invalid)
            .count()
    }
}

/// Classifies each `entries` item as New, Duplicate, or Invalid against
/// `library`'s existing feeds (§4.7). Never mutates `library`.
pub fn plan_import(library: &Library, entries: &[OpmlEntry], update_titles: bool) -> ImportPlan {
    let existing_urls: Vec<(String, &str)> = library
        .feeds
        .iter()
        .map(|f| (f.url.to_lowercase(), f.title.as_str()))
        .collect();

    let mut seen_in_doc: HashSet<String> = HashSet::new();
    let mut planned = Vec::with_capacity(entries.len());

    for entry in entries {
        let Some(raw_url) = entry.xml_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            planned.push(PlannedEntry {
                title: entry.title.clone(),
                url: None,
                verdict: PlanVerdict::Invalid,
                title_update: false,
            });
            continue;
        };
        if url::Url::parse(raw_url).is_err() {
            planned.push(PlannedEntry {
                title: entry.title.clone(),
                url: Some(raw_url.to_string()),
                verdict: PlanVerdict::Invalid,
                title_update: false,
            });
            continue;
        }

        let canonical = canonicalize_url(raw_url);
        let key = canonical.to_lowercase();

        let matches_existing = existing_urls.iter().find(|(url, _)| *url == key);
        let duplicated_in_doc = !seen_in_doc.insert(key.clone());

        if matches_existing.is_some() || duplicated_in_doc {
            let title_update = update_titles
                && matches_existing
                    .map(|(_, title)| *title != entry.title)
                    .unwrap_or(false);
            planned.push(PlannedEntry {
                title: entry.title.clone(),
                url: Some(canonical),
                verdict: PlanVerdict::Duplicate,
                title_update,
            });
        } else {
            planned.push(PlannedEntry {
                title: entry.title.clone(),
                url: Some(canonical),
                verdict: PlanVerdict::New,
                title_update: false,
            });
        }
    }

    ImportPlan { entries: planned }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podliner_proto::model::Feed;

    #[test]
    fn spec_scenario_classifies_new_duplicate_invalid() {
        let mut library = Library::default();
        library.feeds.push(Feed::new("https://a/feed"));

        let entries = vec![
            OpmlEntry {
                title: "A".into(),
                xml_url: Some("https://a/feed".into()),
            },
            OpmlEntry {
                title: "B".into(),
                xml_url: Some("https://b/feed".into()),
            },
            OpmlEntry {
                title: "Bad".into(),
                xml_url: Some("bad-url".into()),
            },
            OpmlEntry {
                title: "B again".into(),
                xml_url: Some("https://b/feed".into()),
            },
        ];

        let plan = plan_import(&library, &entries, false);
        assert_eq!(plan.new_count(), 1);
        assert_eq!(plan.duplicate_count(), 2);
        assert_eq!(plan.invalid_count(), 1);
    }

    #[test]
    fn second_import_of_same_document_yields_zero_new() {
        let mut library = Library::default();
        let entries = vec![OpmlEntry {
            title: "A".into(),
            xml_url: Some("https://a/feed".into()),
        }];
        let first = plan_import(&library, &entries, false);
        assert_eq!(first.new_count(), 1);

        library.feeds.push(Feed::new("https://a/feed"));
        let second = plan_import(&library, &entries, false);
        assert_eq!(second.new_count(), 0);
    }

    #[test]
    fn missing_url_is_invalid() {
        let library = Library::default();
        let entries = vec![OpmlEntry {
            title: "No URL".into(),
            xml_url: None,
        }];
        let plan = plan_import(&library, &entries, false);
        assert_eq!(plan.invalid_count(), 1);
    }
}
