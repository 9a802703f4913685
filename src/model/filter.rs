//! Filter matching (§4.5): the pure predicate the registry and the
//! historical query engine both build on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::event::Event;

/// A single subscription filter. All present fields are AND-ed together;
/// within a field, values are OR-ed (§4.5).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// `#e`, `#p`, etc. Keyed by the single-letter tag name, not including
    /// the leading `#`.
    #[serde(flatten)]
    pub tags: TagFilters,
}

/// Backed by a plain map so arbitrary `#X` tag names round-trip through
/// serde without a fixed field list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilters(pub HashMap<String, Vec<String>>);

impl Serialize for TagFilters {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(&format!("#{k}"), v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TagFilters {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: HashMap<String, Vec<String>> = Deserialize::deserialize(deserializer)?;
        let mut tags = HashMap::new();
        for (k, v) in raw {
            if let Some(name) = k.strip_prefix('#') {
                tags.insert(name.to_owned(), v);
            }
        }
        Ok(TagFilters(tags))
    }
}

impl Filter {
    /// Whether `event` satisfies every constraint present on this filter.
    /// Absent fields impose no constraint (§4.5).
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|p| event.id_hex.starts_with(p.as_str())) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors
                .iter()
                .any(|p| event.pubkey_hex.starts_with(p.as_str()))
            {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        for (name, values) in &self.tags.0 {
            let has_match = event.tags.iter().any(|t| {
                t.first().map(String::as_str) == Some(name.as_str())
                    && t.get(1)
                        .is_some_and(|v| values.iter().any(|want| want == v))
            });
            if !has_match {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !matches_search(search, &event.content) {
                return false;
            }
        }
        true
    }

    /// Whether this filter carries anything beyond `ids`/`limit` — used by
    /// the historical query engine to decide whether a store-level scan is
    /// even worth issuing (§4.6).
    pub fn is_empty_constraint(&self) -> bool {
        self.ids.is_none()
            && self.authors.is_none()
            && self.kinds.is_none()
            && self.since.is_none()
            && self.until.is_none()
            && self.search.is_none()
            && self.tags.0.is_empty()
    }
}

/// §4.5 search semantics: strip a single leading `sort:<token>` directive,
/// then perform a case-insensitive substring match on what remains. A
/// query carrying more than one directive is an unsupported directive set
/// and deterministically matches nothing, rather than silently ignoring
/// the extra directives (§4.5, §9 design note).
fn matches_search(query: &str, content: &str) -> bool {
    let rest = if let Some(after) = query.strip_prefix("sort:") {
        let rest = after.splitn(2, char::is_whitespace).nth(1).unwrap_or("");
        if rest.contains("sort:") {
            return false;
        }
        rest
    } else if query.contains("sort:") {
        return false;
    } else {
        query
    };
    content.to_lowercase().contains(&rest.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::EventRecord;

    fn event_with(kind: u32, pubkey: &str, content: &str, tags: Vec<Vec<String>>) -> Event {
        Event::try_from(EventRecord {
            id: "0".repeat(64),
            pubkey: pubkey.to_owned(),
            created_at: 1000,
            kind,
            tags,
            content: content.to_owned(),
            sig: "2".repeat(128),
        })
        .unwrap()
    }

    #[test]
    fn empty_filter_matches_everything() {
        let f = Filter::default();
        let e = event_with(1, &"a".repeat(64), "hi", vec![]);
        assert!(f.matches(&e));
    }

    #[test]
    fn kind_constraint_excludes_other_kinds() {
        let f = Filter {
            kinds: Some(vec![1, 2]),
            ..Default::default()
        };
        assert!(f.matches(&event_with(1, &"a".repeat(64), "", vec![])));
        assert!(!f.matches(&event_with(3, &"a".repeat(64), "", vec![])));
    }

    #[test]
    fn author_prefix_matches() {
        let f = Filter {
            authors: Some(vec!["aaaa".to_owned()]),
            ..Default::default()
        };
        let pubkey = "aaaa".to_owned() + &"1".repeat(60);
        assert!(f.matches(&event_with(1, &pubkey, "", vec![])));
        let other = "b".repeat(64);
        assert!(!f.matches(&event_with(1, &other, "", vec![])));
    }

    #[test]
    fn tag_filter_requires_matching_value() {
        let mut tags = HashMap::new();
        tags.insert("e".to_owned(), vec!["target".to_owned()]);
        let f = Filter {
            tags: TagFilters(tags),
            ..Default::default()
        };
        let matching = event_with(1, &"a".repeat(64), "", vec![vec!["e".to_owned(), "target".to_owned()]]);
        let not_matching = event_with(1, &"a".repeat(64), "", vec![vec!["e".to_owned(), "other".to_owned()]]);
        assert!(f.matches(&matching));
        assert!(!f.matches(&not_matching));
    }

    #[test]
    fn since_until_bound_created_at() {
        let f = Filter {
            since: Some(500),
            until: Some(1500),
            ..Default::default()
        };
        assert!(f.matches(&event_with(1, &"a".repeat(64), "", vec![])));
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let f = Filter {
            search: Some("HELLO".to_owned()),
            ..Default::default()
        };
        assert!(f.matches(&event_with(1, &"a".repeat(64), "well hello there", vec![])));
        assert!(!f.matches(&event_with(1, &"a".repeat(64), "goodbye", vec![])));
    }

    #[test]
    fn single_sort_directive_is_stripped_before_matching() {
        let f = Filter {
            search: Some("sort:top hello".to_owned()),
            ..Default::default()
        };
        assert!(f.matches(&event_with(1, &"a".repeat(64), "well hello there", vec![])));
    }

    #[test]
    fn multiple_sort_directives_match_nothing() {
        let f = Filter {
            search: Some("sort:top sort:hot hello".to_owned()),
            ..Default::default()
        };
        assert!(!f.matches(&event_with(1, &"a".repeat(64), "well hello there", vec![])));
    }
}
