//! Fleet-wide analyses over the sail registry: sailmaker market share by year
//! and the class rule on how many new sails a hull may buy.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::records::compare_hulls;
use crate::SailRecord;

/// Sails bought per calendar year without penalty.
pub const YEARLY_ALLOWANCE: u32 = 2;
/// Extra sail allowed in a hull's first purchase year.
pub const FIRST_YEAR_BONUS: u32 = 1;
/// Sails allowed across any two consecutive years.
pub const TWO_YEAR_ALLOWANCE: u32 = 3;

const REPLACEMENT_KEYWORDS: [&str; 4] = ["replacement", "replaced", "destroyed", "defective"];

/// Purchases per year per sailmaker, dated records only.
///
/// An empty `sailmakers` filter counts every maker.
pub fn sailmaker_trends<'a, I>(records: I, sailmakers: &[String]) -> BTreeMap<i32, BTreeMap<String, u32>>
where
    I: IntoIterator<Item = &'a SailRecord>,
{
    let mut trends: BTreeMap<i32, BTreeMap<String, u32>> = BTreeMap::new();
    for record in records {
        if !sailmakers.is_empty() && !sailmakers.contains(&record.sailmaker) {
            continue;
        }
        let Some(year) = record.delivery_year() else {
            continue;
        };
        *trends
            .entry(year)
            .or_default()
            .entry(record.sailmaker.clone())
            .or_insert(0) += 1;
    }
    trends
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    YearlyLimit,
    TwoYearLimit,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViolationKind::YearlyLimit => "Yearly limit exceeded",
            ViolationKind::TwoYearLimit => "Two-year limit exceeded",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitViolation {
    pub hull: String,
    pub start_year: i32,
    pub end_year: i32,
    pub count: u32,
    pub allowed: u32,
    pub kind: ViolationKind,
}

impl LimitViolation {
    /// `2020` or `2020-2021`.
    pub fn period(&self) -> String {
        if self.start_year == self.end_year {
            self.start_year.to_string()
        } else {
            format!("{}-{}", self.start_year, self.end_year)
        }
    }
}

fn is_replacement(record: &SailRecord) -> bool {
    record.notes.as_deref().is_some_and(|notes| {
        let notes = notes.to_lowercase();
        REPLACEMENT_KEYWORDS.iter().any(|kw| notes.contains(kw))
    })
}

/// Check every hull against the purchase-limit rule.
///
/// Hull `0` holds sailmaker stock and is skipped, as are undated sails and
/// sails whose notes mark them as replacements. Violations come back grouped
/// by hull (numeric order), yearly ones before two-year ones.
pub fn check_sail_limits<'a, I>(records: I) -> Vec<LimitViolation>
where
    I: IntoIterator<Item = &'a SailRecord>,
{
    let mut per_hull: HashMap<&str, BTreeMap<i32, u32>> = HashMap::new();
    for record in records {
        let hull = record.hull.trim();
        if hull == "0" || hull.is_empty() || is_replacement(record) {
            continue;
        }
        let Some(year) = record.delivery_year() else {
            continue;
        };
        *per_hull.entry(hull).or_default().entry(year).or_insert(0) += 1;
    }

    let mut hulls: Vec<&str> = per_hull.keys().copied().collect();
    hulls.sort_by(|a, b| compare_hulls(a, b));

    let mut violations = Vec::new();
    for hull in hulls {
        let yearly = &per_hull[hull];
        let Some(&first_year) = yearly.keys().next() else {
            continue;
        };
        for (&year, &count) in yearly {
            let allowed = YEARLY_ALLOWANCE + if year == first_year { FIRST_YEAR_BONUS } else { 0 };
            if count > allowed {
                violations.push(LimitViolation {
                    hull: hull.to_string(),
                    start_year: year,
                    end_year: year,
                    count,
                    allowed,
                    kind: ViolationKind::YearlyLimit,
                });
            }
        }
        for (&year, &count) in yearly {
            let total = count + yearly.get(&(year + 1)).copied().unwrap_or(0);
            if total > TWO_YEAR_ALLOWANCE {
                violations.push(LimitViolation {
                    hull: hull.to_string(),
                    start_year: year,
                    end_year: year + 1,
                    count: total,
                    allowed: TWO_YEAR_ALLOWANCE,
                    kind: ViolationKind::TwoYearLimit,
                });
            }
        }
    }
    debug!("{} sail limit violations", violations.len());
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(hull: &str, maker: &str, date: &str, notes: Option<&str>) -> SailRecord {
        SailRecord {
            hull: hull.to_string(),
            sail_type: "J".to_string(),
            sailmaker: maker.to_string(),
            delivery_date: Some(date.to_string()),
            notes: notes.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn trends_count_filtered_makers_per_year() {
        let records = vec![
            rec("1", "North", "2019-01-01", None),
            rec("2", "North", "2019-06-01", None),
            rec("3", "Quantum", "2020-01-01", None),
            rec("4", "Doyle", "2020-01-01", None),
            rec("5", "Ullman", "n/a", None),
        ];
        let makers = vec!["North".to_string(), "Quantum".to_string(), "Ullman".to_string()];
        let trends = sailmaker_trends(&records, &makers);
        assert_eq!(trends.len(), 2);
        assert_eq!(trends[&2019]["North"], 2);
        assert_eq!(trends[&2020].get("Doyle"), None);

        let all = sailmaker_trends(&records, &[]);
        assert_eq!(all[&2020]["Doyle"], 1);
    }

    #[test]
    fn first_year_gets_an_extra_sail() {
        let records = vec![
            rec("7", "North", "2018-01-01", None),
            rec("7", "North", "2018-02-01", None),
            rec("7", "North", "2018-03-01", None),
            rec("7", "North", "2020-01-01", None),
            rec("7", "North", "2020-02-01", None),
            rec("7", "North", "2020-03-01", None),
        ];
        let violations = check_sail_limits(&records);
        assert_eq!(
            violations,
            vec![LimitViolation {
                hull: "7".into(),
                start_year: 2020,
                end_year: 2020,
                count: 3,
                allowed: 2,
                kind: ViolationKind::YearlyLimit,
            }]
        );
    }

    #[test]
    fn consecutive_years_share_an_allowance() {
        let records = vec![
            rec("12", "North", "2015-01-01", None),
            rec("12", "North", "2021-01-01", None),
            rec("12", "North", "2021-05-01", None),
            rec("12", "North", "2022-01-01", None),
            rec("12", "North", "2022-05-01", None),
        ];
        let violations = check_sail_limits(&records);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::TwoYearLimit);
        assert_eq!(violations[0].period(), "2021-2022");
        assert_eq!(violations[0].count, 4);
        assert_eq!(violations[0].kind.to_string(), "Two-year limit exceeded");
    }

    #[test]
    fn stock_replacements_and_undated_sails_are_exempt() {
        let records = vec![
            rec("0", "North", "2021-01-01", None),
            rec("0", "North", "2021-01-02", None),
            rec("0", "North", "2021-01-03", None),
            rec("0", "North", "2021-01-04", None),
            rec("9", "North", "2010-01-01", None),
            rec("9", "North", "2021-01-01", None),
            rec("9", "North", "2021-02-01", None),
            rec("9", "North", "2021-03-01", Some("Replacement for torn kite")),
            rec("9", "North", "2021-04-01", Some("DEFECTIVE cloth")),
            rec("9", "North", "someday", None),
        ];
        assert!(check_sail_limits(&records).is_empty());
    }

    #[test]
    fn violations_are_ordered_by_hull() {
        let mut records = Vec::new();
        for hull in ["100", "20"] {
            records.push(rec(hull, "North", "2000-01-01", None));
            for month in 1..=3 {
                records.push(rec(hull, "North", &format!("2010-0{month}-01"), None));
            }
        }
        let hulls: Vec<_> = check_sail_limits(&records)
            .into_iter()
            .map(|v| v.hull)
            .collect();
        assert_eq!(hulls, vec!["20", "100"]);
    }
}
