use super::CategoryMap;
use crate::models::RankCategory;
use std::collections::{HashMap, HashSet};

/// Keep each portfolio only in its highest-priority list
/// (total > yearly > monthly > weekly > daily), then re-rank every list 1..N
/// in its previous rank order. Lists that end up empty stay in the map.
pub fn dedupe(lists: CategoryMap) -> CategoryMap {
    let mut owner: HashMap<String, RankCategory> = HashMap::new();
    for (category, entries) in &lists {
        for e in entries {
            owner
                .entry(e.portfolio_id.clone())
                .and_modify(|best| {
                    if category.priority() < best.priority() {
                        *best = *category;
                    }
                })
                .or_insert(*category);
        }
    }

    lists
        .into_iter()
        .map(|(category, entries)| {
            let mut seen = HashSet::new();
            let mut kept: Vec<_> = entries
                .into_iter()
                .filter(|e| owner.get(&e.portfolio_id) == Some(&category))
                .filter(|e| seen.insert(e.portfolio_id.clone()))
                .collect();

            kept.sort_by_key(|e| e.rank);
            for (i, e) in kept.iter_mut().enumerate() {
                e.rank = i + 1;
            }
            (category, kept)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RankEntry;
    use serde_json::Map;

    fn list(category: RankCategory, ids: &[&str]) -> (RankCategory, Vec<RankEntry>) {
        let entries = ids
            .iter()
            .enumerate()
            .map(|(i, id)| RankEntry {
                portfolio_id: id.to_string(),
                name: format!("combo {id}"),
                rate: None,
                rate_title: None,
                rank: i + 1,
                category,
                extra: Map::new(),
            })
            .collect();
        (category, entries)
    }

    fn ids(map: &CategoryMap, category: RankCategory) -> Vec<&str> {
        map[&category].iter().map(|e| e.portfolio_id.as_str()).collect()
    }

    fn sample() -> CategoryMap {
        CategoryMap::from([
            list(RankCategory::Daily, &["a", "b", "c", "d"]),
            list(RankCategory::Weekly, &["b", "e", "c"]),
            list(RankCategory::Yearly, &["c", "f"]),
            list(RankCategory::Total, &["g", "e"]),
        ])
    }

    #[test]
    fn test_highest_priority_occurrence_wins() {
        let out = dedupe(sample());

        assert_eq!(ids(&out, RankCategory::Daily), vec!["a", "d"]);
        assert_eq!(ids(&out, RankCategory::Weekly), vec!["b"]);
        assert_eq!(ids(&out, RankCategory::Yearly), vec!["c", "f"]);
        assert_eq!(ids(&out, RankCategory::Total), vec!["g", "e"]);
    }

    #[test]
    fn test_weekly_and_total_duplicate_survives_in_total() {
        let out = dedupe(CategoryMap::from([
            list(RankCategory::Weekly, &["x", "p"]),
            list(RankCategory::Total, &["q", "p"]),
        ]));
        assert_eq!(ids(&out, RankCategory::Weekly), vec!["x"]);
        assert_eq!(ids(&out, RankCategory::Total), vec!["q", "p"]);
    }

    #[test]
    fn test_ranks_reassigned_contiguously() {
        let out = dedupe(sample());
        for entries in out.values() {
            let ranks: Vec<usize> = entries.iter().map(|e| e.rank).collect();
            assert_eq!(ranks, (1..=entries.len()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_each_id_appears_once() {
        let out = dedupe(sample());
        let mut seen = HashSet::new();
        for e in out.values().flatten() {
            assert!(seen.insert(e.portfolio_id.clone()), "duplicate {}", e.portfolio_id);
        }
        assert_eq!(seen.len(), 7);
    }

    #[test]
    fn test_idempotent() {
        let once = dedupe(sample());
        let twice = dedupe(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_emptied_list_is_kept() {
        let out = dedupe(CategoryMap::from([
            list(RankCategory::Daily, &["a"]),
            list(RankCategory::Monthly, &["a"]),
        ]));
        assert!(out[&RankCategory::Daily].is_empty());
        assert_eq!(ids(&out, RankCategory::Monthly), vec!["a"]);
    }

    #[test]
    fn test_repeat_within_one_list_kept_once() {
        let out = dedupe(CategoryMap::from([list(RankCategory::Daily, &["a", "b", "a"])]));
        assert_eq!(ids(&out, RankCategory::Daily), vec!["a", "b"]);
        assert_eq!(out[&RankCategory::Daily][1].rank, 2);
    }
}
