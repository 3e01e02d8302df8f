use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::debug;

use crate::{parse_records, SailError, SailRecord};

/// Read-only registry of sail records, loaded once and shared by the tools.
#[derive(Clone, Debug, Default)]
pub struct RecordStore {
    records: Vec<SailRecord>,
}

impl RecordStore {
    pub fn new(records: Vec<SailRecord>) -> Self {
        Self { records }
    }

    pub fn from_json(input: &[u8]) -> Result<Self, SailError> {
        let records = parse_records(input)?;
        debug!("loaded {} sail records", records.len());
        Ok(Self::new(records))
    }

    pub fn records(&self) -> &[SailRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn for_hull<'a>(&'a self, hull: &'a str) -> impl Iterator<Item = &'a SailRecord> + 'a {
        self.records.iter().filter(move |r| r.hull == hull)
    }

    pub fn has_hull(&self, hull: &str) -> bool {
        self.records.iter().any(|r| r.hull == hull)
    }

    /// Distinct hull ids, numeric hulls first in numeric order.
    pub fn hulls(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut hulls: Vec<String> = self
            .records
            .iter()
            .filter(|r| seen.insert(r.hull.as_str()))
            .map(|r| r.hull.clone())
            .collect();
        hulls.sort_by(|a, b| compare_hulls(a, b));
        hulls
    }

    pub fn by_certificate(&self, certificate: &str) -> Option<&SailRecord> {
        if certificate.is_empty() {
            return None;
        }
        self.records
            .iter()
            .find(|r| r.certificate_no == certificate)
    }
}

pub(crate) fn compare_hulls(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<u64>(), b.trim().parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hull: &str, cert: &str) -> SailRecord {
        SailRecord {
            hull: hull.to_string(),
            certificate_no: cert.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn hulls_sort_numerically() {
        let store = RecordStore::new(vec![
            record("128", "a"),
            record("10", "b"),
            record("9", "c"),
            record("10", "d"),
            record("TBD", "e"),
        ]);
        assert_eq!(store.hulls(), vec!["9", "10", "128", "TBD"]);
    }

    #[test]
    fn filters_and_lookups() {
        let store = RecordStore::new(vec![record("12", "C1"), record("13", "C2"), record("12", "C3")]);
        let certs: Vec<_> = store.for_hull("12").map(|r| r.certificate_no.as_str()).collect();
        assert_eq!(certs, vec!["C1", "C3"]);
        assert!(store.has_hull("13"));
        assert!(!store.has_hull("14"));
        assert_eq!(store.by_certificate("C2").map(|r| r.hull.as_str()), Some("13"));
        assert!(store.by_certificate("").is_none());
    }

    #[test]
    fn from_json_propagates_invalid_data() {
        assert!(matches!(
            RecordStore::from_json(b"{}"),
            Err(SailError::InvalidData(_))
        ));
    }
}
