//! Sail purchase heatmap: per-hull counts of deliveries by
//! (sail type, sailmaker) and calendar year.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::records::RecordStore;
use crate::SailRecord;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregationKey {
    pub sail_type: String,
    pub sailmaker: String,
}

impl AggregationKey {
    pub fn new(sail_type: impl Into<String>, sailmaker: impl Into<String>) -> Self {
        Self {
            sail_type: sail_type.into(),
            sailmaker: sailmaker.into(),
        }
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.sail_type, self.sailmaker)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationCell {
    pub key: AggregationKey,
    pub year: i32,
    pub count: u32,
}

/// Count deliveries per (sail type, sailmaker) and year.
///
/// Records without a parseable delivery date contribute nothing. Keys come out
/// in first-seen order with their years ascending, but callers should not rely
/// on cell order; [`HeatmapGrid`] imposes the display ordering.
pub fn aggregate<'a, I>(records: I) -> Vec<AggregationCell>
where
    I: IntoIterator<Item = &'a SailRecord>,
{
    let mut index: HashMap<AggregationKey, usize> = HashMap::new();
    let mut groups: Vec<(AggregationKey, BTreeMap<i32, u32>)> = Vec::new();

    for record in records {
        let Some(year) = record.delivery_year() else {
            continue;
        };
        let key = AggregationKey::new(record.sail_type.as_str(), record.sailmaker.as_str());
        let slot = match index.get(&key).copied() {
            Some(slot) => slot,
            None => {
                groups.push((key.clone(), BTreeMap::new()));
                index.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };
        *groups[slot].1.entry(year).or_insert(0) += 1;
    }

    groups
        .into_iter()
        .flat_map(|(key, years)| {
            years.into_iter().map(move |(year, count)| AggregationCell {
                key: key.clone(),
                year,
                count,
            })
        })
        .collect()
}

/// Cells laid out on a (category row, year column) grid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeatmapGrid {
    pub hull: String,
    /// Column axis, ascending.
    pub years: Vec<i32>,
    /// Row axis, first-seen order.
    pub keys: Vec<AggregationKey>,
    pub cells: Vec<AggregationCell>,
    pub max_count: u32,
    counts: Vec<Vec<u32>>,
}

impl HeatmapGrid {
    pub fn from_cells(hull: impl Into<String>, cells: Vec<AggregationCell>) -> Self {
        let mut years: Vec<i32> = cells.iter().map(|c| c.year).collect();
        years.sort_unstable();
        years.dedup();

        let mut keys: Vec<AggregationKey> = Vec::new();
        for cell in &cells {
            if !keys.contains(&cell.key) {
                keys.push(cell.key.clone());
            }
        }

        let mut counts = vec![vec![0u32; years.len()]; keys.len()];
        for cell in &cells {
            let row = keys.iter().position(|k| *k == cell.key);
            let col = years.binary_search(&cell.year).ok();
            if let (Some(row), Some(col)) = (row, col) {
                counts[row][col] += cell.count;
            }
        }
        let max_count = cells.iter().map(|c| c.count).max().unwrap_or(0);

        Self {
            hull: hull.into(),
            years,
            keys,
            cells,
            max_count,
            counts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn rows(&self) -> usize {
        self.keys.len()
    }

    pub fn columns(&self) -> usize {
        self.years.len()
    }

    /// Count at a grid position; 0 where nothing was delivered.
    pub fn count_at(&self, row: usize, col: usize) -> u32 {
        self.counts
            .get(row)
            .and_then(|r| r.get(col))
            .copied()
            .unwrap_or(0)
    }

    pub fn position_of(&self, cell: &AggregationCell) -> Option<(usize, usize)> {
        let row = self.keys.iter().position(|k| *k == cell.key)?;
        let col = self.years.binary_search(&cell.year).ok()?;
        Some((row, col))
    }

    pub fn total(&self) -> u32 {
        self.cells.iter().map(|c| c.count).sum()
    }

    /// Colour-scale position of `count` in `[0, 1]`.
    pub fn intensity(&self, count: u32) -> f64 {
        if self.max_count == 0 {
            0.0
        } else {
            (count as f64 / self.max_count as f64).clamp(0.0, 1.0)
        }
    }

    /// Dark cells get light labels.
    pub fn needs_light_label(&self, count: u32) -> bool {
        count as f64 > self.max_count as f64 * 0.6
    }
}

/// Build the grid for one hull; `None` when the hull has no records at all.
pub fn build_heatmap(store: &RecordStore, hull: &str) -> Option<HeatmapGrid> {
    if !store.has_hull(hull) {
        return None;
    }
    Some(HeatmapGrid::from_cells(hull, aggregate(store.for_hull(hull))))
}

/// Sequential white-to-navy scale, `t` in `[0, 1]`.
pub fn blues(t: f64) -> (u8, u8, u8) {
    const LOW: (f64, f64, f64) = (247.0, 251.0, 255.0);
    const HIGH: (f64, f64, f64) = (8.0, 48.0, 107.0);
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let lerp = |a: f64, b: f64| (a + (b - a) * t).round() as u8;
    (
        lerp(LOW.0, HIGH.0),
        lerp(LOW.1, HIGH.1),
        lerp(LOW.2, HIGH.2),
    )
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HullStats {
    pub total_sails: usize,
    pub sailmakers: Vec<String>,
    pub sail_types: Vec<String>,
    pub first_year: Option<i32>,
    pub last_year: Option<i32>,
}

pub fn hull_stats<'a, I>(records: I) -> HullStats
where
    I: IntoIterator<Item = &'a SailRecord>,
{
    let mut stats = HullStats::default();
    for record in records {
        stats.total_sails += 1;
        if !stats.sailmakers.contains(&record.sailmaker) {
            stats.sailmakers.push(record.sailmaker.clone());
        }
        if !stats.sail_types.contains(&record.sail_type) {
            stats.sail_types.push(record.sail_type.clone());
        }
        if let Some(year) = record.delivery_year() {
            stats.first_year = Some(stats.first_year.map_or(year, |y| y.min(year)));
            stats.last_year = Some(stats.last_year.map_or(year, |y| y.max(year)));
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(hull: &str, sail_type: &str, maker: &str, date: Option<&str>) -> SailRecord {
        SailRecord {
            hull: hull.to_string(),
            sail_type: sail_type.to_string(),
            sailmaker: maker.to_string(),
            certificate_no: format!("{hull}-{sail_type}-{}", date.unwrap_or("none")),
            delivery_date: date.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn aggregates_by_key_and_year() {
        let records = vec![
            rec("12", "J", "X", Some("2020-05-01")),
            rec("12", "J", "X", Some("2020-08-01")),
            rec("12", "J", "X", Some("2021-01-01")),
        ];
        let cells = aggregate(&records);
        assert_eq!(
            cells,
            vec![
                AggregationCell {
                    key: AggregationKey::new("J", "X"),
                    year: 2020,
                    count: 2
                },
                AggregationCell {
                    key: AggregationKey::new("J", "X"),
                    year: 2021,
                    count: 1
                },
            ]
        );
        assert_eq!(cells[0].key.label(), "J (X)");
    }

    #[test]
    fn undated_records_are_skipped_and_counts_add_up() {
        let records = vec![
            rec("5", "M", "North", Some("2018-02-01")),
            rec("5", "M", "North", None),
            rec("5", "J", "Quantum", Some("garbage")),
            rec("5", "S89", "Ullman", Some("2019-06-30")),
            rec("5", "J", "Quantum", Some("2019-01-10")),
        ];
        let cells = aggregate(&records);
        let dated = records.iter().filter(|r| r.delivered_on().is_some()).count();
        assert_eq!(cells.iter().map(|c| c.count as usize).sum::<usize>(), dated);
        assert!(cells.iter().all(|c| c.count >= 1));
    }

    #[test]
    fn grid_orders_years_ascending_and_keys_first_seen() {
        let records = vec![
            rec("9", "S89", "North", Some("2022-04-01")),
            rec("9", "J", "Quantum", Some("2019-04-01")),
            rec("9", "S89", "North", Some("2017-04-01")),
            rec("9", "J", "Quantum", Some("2019-05-01")),
        ];
        let grid = HeatmapGrid::from_cells("9", aggregate(&records));
        assert_eq!(grid.years, vec![2017, 2019, 2022]);
        assert_eq!(
            grid.keys,
            vec![
                AggregationKey::new("S89", "North"),
                AggregationKey::new("J", "Quantum")
            ]
        );
        assert_eq!(grid.count_at(1, 1), 2);
        assert_eq!(grid.count_at(1, 0), 0);
        assert_eq!(grid.count_at(5, 5), 0);
        assert_eq!(grid.max_count, 2);
        assert_eq!(grid.total(), 4);
        assert!((grid.intensity(1) - 0.5).abs() < 1e-9);
        assert!(grid.needs_light_label(2));
        assert!(!grid.needs_light_label(1));
    }

    #[test]
    fn build_heatmap_distinguishes_unknown_hulls() {
        let store = RecordStore::new(vec![
            rec("1", "J", "North", None),
            rec("2", "J", "North", Some("2020-01-01")),
        ]);
        assert!(build_heatmap(&store, "3").is_none());
        let undated = build_heatmap(&store, "1").unwrap();
        assert!(undated.is_empty());
        assert_eq!(undated.intensity(3), 0.0);
        let dated = build_heatmap(&store, "2").unwrap();
        assert_eq!(dated.total(), 1);
    }

    #[test]
    fn every_hull_sums_to_its_dated_records() {
        let store = RecordStore::new(vec![
            rec("1", "J", "North", Some("2020-01-01")),
            rec("1", "M", "North", Some("2021-01-01")),
            rec("2", "J", "Ullman", Some("2020-01-01")),
            rec("2", "J", "Ullman", None),
            rec("3", "S89", "Quantum", Some("bad")),
        ]);
        for hull in store.hulls() {
            let grid = build_heatmap(&store, &hull).unwrap();
            let dated = store
                .for_hull(&hull)
                .filter(|r| r.delivered_on().is_some())
                .count();
            assert_eq!(grid.total() as usize, dated, "hull {hull}");
        }
    }

    #[test]
    fn blues_scale_endpoints() {
        assert_eq!(blues(0.0), (247, 251, 255));
        assert_eq!(blues(1.0), (8, 48, 107));
        assert_eq!(blues(f64::NAN), (247, 251, 255));
        assert_eq!(blues(7.0), (8, 48, 107));
    }

    #[test]
    fn stats_cover_makers_types_and_dated_years() {
        let records = vec![
            rec("4", "J", "North", Some("2016-01-01")),
            rec("4", "M", "Quantum", None),
            rec("4", "J", "North", Some("2023-01-01")),
        ];
        let stats = hull_stats(&records);
        assert_eq!(stats.total_sails, 3);
        assert_eq!(stats.sailmakers, vec!["North", "Quantum"]);
        assert_eq!(stats.sail_types, vec!["J", "M"]);
        assert_eq!(stats.first_year, Some(2016));
        assert_eq!(stats.last_year, Some(2023));
    }
}
