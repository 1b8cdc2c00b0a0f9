use crate::grade::{SlotKey, SlotValue, SubjectGrade};
use crate::scheme::{AggregateInput, DerivedKey, GradingScheme};
use serde::Serialize;
use std::collections::BTreeMap;

/// Round-half-up of `sum / count` in integer arithmetic:
/// `floor(sum / count + 1/2) == (2*sum + count) / (2*count)`.
pub fn round_half_up_mean(sum: u32, count: u32) -> Option<u32> {
    if count == 0 {
        return None;
    }
    Some((2 * sum + count) / (2 * count))
}

/// Derived figures for one SubjectGrade. A key maps to `None` when any of its inputs
/// is not a score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CalculatedGrade {
    values: BTreeMap<DerivedKey, Option<u16>>,
}

impl CalculatedGrade {
    pub fn get(&self, key: DerivedKey) -> Option<u16> {
        self.values.get(&key).copied().flatten()
    }

    pub fn keys(&self) -> impl Iterator<Item = DerivedKey> + '_ {
        self.values.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn calculate(scheme: GradingScheme, grade: &SubjectGrade) -> CalculatedGrade {
    let mut values: BTreeMap<DerivedKey, Option<u16>> = BTreeMap::new();

    for agg in scheme.layout().aggregates {
        let mut sum: u32 = 0;
        let mut defined = true;
        for input in agg.inputs {
            let v = match *input {
                AggregateInput::Slot(k) => grade.get(k).score(),
                AggregateInput::Derived(d) => values.get(&d).copied().flatten(),
            };
            match v {
                Some(n) => sum += u32::from(n),
                None => {
                    defined = false;
                    break;
                }
            }
        }

        let out = if defined {
            round_half_up_mean(sum, agg.inputs.len() as u32).and_then(|n| u16::try_from(n).ok())
        } else {
            None
        };
        values.insert(agg.key, out);
    }

    CalculatedGrade { values }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnStats {
    pub scored_count: usize,
    pub absent_count: usize,
    pub exempted_count: usize,
    pub not_entered_count: usize,
    pub average: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatistics {
    pub slots: BTreeMap<SlotKey, ColumnStats>,
    pub derived: BTreeMap<DerivedKey, ColumnStats>,
}

/// Per-column counts and rounded class averages across a set of students.
/// Derived columns have no sentinel counts: an undefined figure counts as not entered.
pub fn class_statistics<'a, I>(scheme: GradingScheme, grades: I) -> ClassStatistics
where
    I: IntoIterator<Item = &'a SubjectGrade>,
{
    let layout = scheme.layout();
    let mut slot_sums: BTreeMap<SlotKey, (ColumnStats, u32)> = layout
        .slots
        .iter()
        .map(|k| (*k, (ColumnStats::default(), 0)))
        .collect();
    let mut derived_sums: BTreeMap<DerivedKey, (ColumnStats, u32)> = layout
        .aggregates
        .iter()
        .map(|a| (a.key, (ColumnStats::default(), 0)))
        .collect();

    for grade in grades {
        for (key, (stats, sum)) in slot_sums.iter_mut() {
            match grade.get(*key) {
                SlotValue::NotEntered => stats.not_entered_count += 1,
                SlotValue::Absent => stats.absent_count += 1,
                SlotValue::Exempted => stats.exempted_count += 1,
                SlotValue::Score(n) => {
                    stats.scored_count += 1;
                    *sum += u32::from(n);
                }
            }
        }
        let calculated = calculate(scheme, grade);
        for (key, (stats, sum)) in derived_sums.iter_mut() {
            match calculated.get(*key) {
                Some(n) => {
                    stats.scored_count += 1;
                    *sum += u32::from(n);
                }
                None => stats.not_entered_count += 1,
            }
        }
    }

    let finish = |(mut stats, sum): (ColumnStats, u32)| {
        stats.average = round_half_up_mean(sum, stats.scored_count as u32);
        stats
    };

    ClassStatistics {
        slots: slot_sums.into_iter().map(|(k, v)| (k, finish(v))).collect(),
        derived: derived_sums.into_iter().map(|(k, v)| (k, finish(v))).collect(),
    }
}
