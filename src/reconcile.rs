use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use crate::model::{BestGuessCoordinate, Candidate, GroundingReference};

lazy_static! {
    static ref AT_SEGMENT: Regex = Regex::new(r"@(-?\d+\.\d+),(-?\d+\.\d+)").unwrap();
    static ref QUERY_VALUE: Regex = Regex::new(r"^(?:loc:)?(-?\d+\.\d+),(-?\d+\.\d+)").unwrap();
    static ref QUERY_RAW: Regex = Regex::new(r"[?&]q=(?:loc:)?(-?\d+\.\d+),(-?\d+\.\d+)").unwrap();
    static ref DATA_TOKENS: Regex = Regex::new(r"!3d(-?\d+\.\d+)!4d(-?\d+\.\d+)").unwrap();
}

/// Deep link for a raw coordinate pair.
pub fn map_search_uri(lat: f64, lng: f64) -> String {
    format!("https://www.google.com/maps/search/?api=1&query={},{}", lat, lng)
}

/// One coordinate-encoding convention used by map-service URIs.
pub trait CoordinateMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, uri: &str) -> Option<(f64, f64)>;
}

fn pair_from(re: &Regex, haystack: &str) -> Option<(f64, f64)> {
    let caps = re.captures(haystack)?;
    let lat = caps.get(1)?.as_str().parse().ok()?;
    let lng = caps.get(2)?.as_str().parse().ok()?;
    Some((lat, lng))
}

/// `.../@48.8566,2.3522,15z`
pub struct AtSegmentMatcher;

impl CoordinateMatcher for AtSegmentMatcher {
    fn name(&self) -> &'static str {
        "at-segment"
    }

    fn extract(&self, uri: &str) -> Option<(f64, f64)> {
        pair_from(&AT_SEGMENT, uri)
    }
}

/// `?q=40.7128,-74.0060` or `?q=loc:40.7128,-74.0060`
pub struct QueryParamMatcher;

impl CoordinateMatcher for QueryParamMatcher {
    fn name(&self) -> &'static str {
        "query-param"
    }

    fn extract(&self, uri: &str) -> Option<(f64, f64)> {
        match Url::parse(uri) {
            Ok(url) => {
                let (_, value) = url.query_pairs().find(|(key, _)| key == "q")?;
                pair_from(&QUERY_VALUE, &value)
            }
            // relative or scheme-less links
            Err(_) => pair_from(&QUERY_RAW, uri),
        }
    }
}

/// `...!3d51.5014!4d-0.1419`
pub struct DataTokenMatcher;

impl CoordinateMatcher for DataTokenMatcher {
    fn name(&self) -> &'static str {
        "data-tokens"
    }

    fn extract(&self, uri: &str) -> Option<(f64, f64)> {
        pair_from(&DATA_TOKENS, uri)
    }
}

/// Both values rounded to 3 decimals (~111 m) and joined.
fn dedup_key(lat: f64, lng: f64) -> String {
    format!("{:.3},{:.3}", lat, lng)
}

/// Merges the model's best guess with the coordinates recoverable from
/// `Place` grounding references into one ordered, deduplicated list.
pub struct Reconciler {
    matchers: Vec<Box<dyn CoordinateMatcher>>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            matchers: vec![
                Box::new(AtSegmentMatcher),
                Box::new(QueryParamMatcher),
                Box::new(DataTokenMatcher),
            ],
        }
    }
}

impl Reconciler {
    /// Appends a convention; it is tried after all existing ones.
    pub fn with_matcher(mut self, matcher: Box<dyn CoordinateMatcher>) -> Self {
        self.matchers.push(matcher);
        self
    }

    pub fn coordinates_from_uri(&self, uri: &str) -> Option<(f64, f64)> {
        self.matchers.iter().find_map(|m| {
            let found = m.extract(uri);
            if found.is_some() {
                log::trace!("Matcher '{}' resolved {}", m.name(), uri);
            }
            found
        })
    }

    pub fn reconcile<'a>(
        &self,
        best_guess: Option<&BestGuessCoordinate>,
        references: impl IntoIterator<Item = &'a GroundingReference>,
        unknown_label: &str,
    ) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        if let Some(guess) = best_guess {
            seen.insert(dedup_key(guess.lat, guess.lng));
            candidates.push(Candidate {
                lat: guess.lat,
                lng: guess.lng,
                title: title_or(&guess.location_name, unknown_label),
                source_uri: Some(map_search_uri(guess.lat, guess.lng)),
            });
        }

        for reference in references {
            let GroundingReference::Place { uri, title } = reference else {
                continue;
            };
            let Some(uri) = uri else {
                log::trace!("Skipping place '{}' without uri", title);
                continue;
            };
            let Some((lat, lng)) = self.coordinates_from_uri(uri) else {
                log::debug!("No coordinates recognized in {}", uri);
                continue;
            };
            if !seen.insert(dedup_key(lat, lng)) {
                log::trace!("Dropping duplicate candidate ({}, {}) from {}", lat, lng, uri);
                continue;
            }
            candidates.push(Candidate {
                lat,
                lng,
                title: title_or(title, unknown_label),
                source_uri: Some(uri.clone()),
            });
        }

        log::debug!("Reconciled {} map candidates", candidates.len());
        candidates
    }
}

fn title_or(title: &str, fallback: &str) -> String {
    if title.is_empty() {
        fallback.to_string()
    } else {
        title.to_string()
    }
}
