//! Subscription identity and the index keys derived from a filter set
//! (§3, §4.3).

use std::collections::HashSet;

use super::event::Event;
use super::filter::Filter;

/// Client-assigned subscription identifier, unique per connection.
pub type SubId = String;

/// A live subscription: the set of filters a connection asked to be
/// notified about, any one of which may match (§3 — OR across filters,
/// AND within a filter).
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubId,
    pub filters: Vec<Filter>,
}

impl Subscription {
    pub fn new(id: SubId, filters: Vec<Filter>) -> Self {
        Self { id, filters }
    }

    pub fn matches_any(&self, event: &Event) -> bool {
        self.filters.iter().any(|f| f.matches(event))
    }

    /// Every inverted-index key a subscription's filters write to on
    /// subscribe (§4.3 "Index maintenance rules"):
    /// - an empty filter writes only to `all`;
    /// - otherwise it writes `kind:<k>` per kind, or `kind:*` if `kinds` is
    ///   absent, symmetrically for `authors`; `id:<i>` per id when present;
    ///   `tag:<name>:<value>` per tag constraint.
    pub fn index_keys(&self) -> HashSet<IndexKey> {
        let mut keys = HashSet::new();
        for filter in &self.filters {
            if filter.is_empty_constraint() {
                keys.insert(IndexKey::All);
                continue;
            }
            match &filter.kinds {
                Some(kinds) => {
                    for k in kinds {
                        keys.insert(IndexKey::Kind(*k));
                    }
                }
                None => {
                    keys.insert(IndexKey::KindWildcard);
                }
            }
            match &filter.authors {
                Some(authors) => {
                    for a in authors {
                        keys.insert(IndexKey::Author(a.clone()));
                    }
                }
                None => {
                    keys.insert(IndexKey::AuthorWildcard);
                }
            }
            if let Some(ids) = &filter.ids {
                for i in ids {
                    keys.insert(IndexKey::Id(i.clone()));
                }
            }
            for (name, values) in &filter.tags.0 {
                for v in values {
                    keys.insert(IndexKey::Tag(name.clone(), v.clone()));
                }
            }
        }
        keys
    }
}

/// A single inverted-index bucket key (§4.3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Kind(u32),
    KindWildcard,
    Author(String),
    AuthorWildcard,
    Id(String),
    Tag(String, String),
    All,
}

impl IndexKey {
    /// The candidate index keys to union for an incoming event (§4.3
    /// `candidates(event)`): `all`, `kind:<k>`, `kind:*`, `author:<p>`,
    /// `author:*`, `id:<i>`, and `tag:<name>:<value>` for every tag pair.
    /// This is a superset lookup, not an exact-match filter.
    pub fn candidate_keys(event: &Event) -> Vec<IndexKey> {
        let mut keys = vec![
            IndexKey::All,
            IndexKey::Kind(event.kind),
            IndexKey::KindWildcard,
            IndexKey::Author(event.pubkey_hex.clone()),
            IndexKey::AuthorWildcard,
            IndexKey::Id(event.id_hex.clone()),
        ];
        for tag in &event.tags {
            if let (Some(name), Some(value)) = (tag.first(), tag.get(1)) {
                keys.push(IndexKey::Tag(name.clone(), value.clone()));
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::EventRecord;
    use crate::model::filter::Filter;

    #[test]
    fn empty_filter_writes_only_to_all() {
        let sub = Subscription::new("s1".to_owned(), vec![Filter::default()]);
        let keys = sub.index_keys();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&IndexKey::All));
    }

    #[test]
    fn filter_with_only_authors_writes_kind_wildcard_and_author_key() {
        let f = Filter {
            authors: Some(vec!["abc".to_owned()]),
            ..Default::default()
        };
        let sub = Subscription::new("s1".to_owned(), vec![f]);
        let keys = sub.index_keys();
        assert!(keys.contains(&IndexKey::KindWildcard));
        assert!(keys.contains(&IndexKey::Author("abc".to_owned())));
        assert!(!keys.contains(&IndexKey::All));
    }

    #[test]
    fn filter_with_kind_and_author_produces_both_specific_keys() {
        let f = Filter {
            kinds: Some(vec![1]),
            authors: Some(vec!["abc".to_owned()]),
            ..Default::default()
        };
        let sub = Subscription::new("s1".to_owned(), vec![f]);
        let keys = sub.index_keys();
        assert!(keys.contains(&IndexKey::Kind(1)));
        assert!(keys.contains(&IndexKey::Author("abc".to_owned())));
    }

    #[test]
    fn candidate_keys_cover_event_kind_author_id_and_tags() {
        let event = Event::try_from(EventRecord {
            id: "0".repeat(64),
            pubkey: "1".repeat(64),
            created_at: 1,
            kind: 1,
            tags: vec![vec!["e".to_owned(), "abc".to_owned()]],
            content: String::new(),
            sig: "2".repeat(128),
        })
        .unwrap();
        let keys = IndexKey::candidate_keys(&event);
        assert!(keys.contains(&IndexKey::All));
        assert!(keys.contains(&IndexKey::Kind(1)));
        assert!(keys.contains(&IndexKey::KindWildcard));
        assert!(keys.contains(&IndexKey::Author("1".repeat(64))));
        assert!(keys.contains(&IndexKey::Id("0".repeat(64))));
        assert!(keys.contains(&IndexKey::Tag("e".to_owned(), "abc".to_owned())));
    }
}
