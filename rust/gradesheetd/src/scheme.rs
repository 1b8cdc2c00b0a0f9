use crate::grade::SlotKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchoolLevel {
    Primary,
    Intermediate,
    Secondary,
}

impl SchoolLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Some(SchoolLevel::Primary),
            "intermediate" => Some(SchoolLevel::Intermediate),
            "secondary" => Some(SchoolLevel::Secondary),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchoolLevel::Primary => "primary",
            SchoolLevel::Intermediate => "intermediate",
            SchoolLevel::Secondary => "secondary",
        }
    }
}

/// Figures derived by the calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DerivedKey {
    FirstSemesterAverage,
    SecondSemesterAverage,
    AnnualPursuit,
}

impl DerivedKey {
    pub fn as_str(self) -> &'static str {
        match self {
            DerivedKey::FirstSemesterAverage => "firstSemesterAverage",
            DerivedKey::SecondSemesterAverage => "secondSemesterAverage",
            DerivedKey::AnnualPursuit => "annualPursuit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateInput {
    Slot(SlotKey),
    Derived(DerivedKey),
}

/// A derived figure and the inputs it averages. Inputs of kind `Derived` must refer to
/// an aggregate listed earlier in the same layout.
#[derive(Debug)]
pub struct Aggregate {
    pub key: DerivedKey,
    pub inputs: &'static [AggregateInput],
}

#[derive(Debug)]
pub struct SchemeLayout {
    pub slots: &'static [SlotKey],
    pub aggregates: &'static [Aggregate],
}

use AggregateInput::{Derived, Slot};

static STANDARD: SchemeLayout = SchemeLayout {
    slots: &[
        SlotKey::FirstSemMonth1,
        SlotKey::FirstSemMonth2,
        SlotKey::MidYear,
        SlotKey::SecondSemMonth1,
        SlotKey::SecondSemMonth2,
    ],
    aggregates: &[
        Aggregate {
            key: DerivedKey::FirstSemesterAverage,
            inputs: &[Slot(SlotKey::FirstSemMonth1), Slot(SlotKey::FirstSemMonth2)],
        },
        Aggregate {
            key: DerivedKey::SecondSemesterAverage,
            inputs: &[Slot(SlotKey::SecondSemMonth1), Slot(SlotKey::SecondSemMonth2)],
        },
        Aggregate {
            key: DerivedKey::AnnualPursuit,
            inputs: &[
                Derived(DerivedKey::FirstSemesterAverage),
                Slot(SlotKey::MidYear),
                Derived(DerivedKey::SecondSemesterAverage),
            ],
        },
    ],
};

static UPPER_PRIMARY: SchemeLayout = SchemeLayout {
    slots: &[
        SlotKey::October,
        SlotKey::November,
        SlotKey::December,
        SlotKey::January,
        SlotKey::MidYear,
        SlotKey::February,
        SlotKey::March,
        SlotKey::April,
    ],
    aggregates: &[
        Aggregate {
            key: DerivedKey::FirstSemesterAverage,
            inputs: &[
                Slot(SlotKey::October),
                Slot(SlotKey::November),
                Slot(SlotKey::December),
                Slot(SlotKey::January),
            ],
        },
        Aggregate {
            key: DerivedKey::SecondSemesterAverage,
            inputs: &[
                Slot(SlotKey::February),
                Slot(SlotKey::March),
                Slot(SlotKey::April),
            ],
        },
        Aggregate {
            key: DerivedKey::AnnualPursuit,
            inputs: &[
                Derived(DerivedKey::FirstSemesterAverage),
                Slot(SlotKey::MidYear),
                Derived(DerivedKey::SecondSemesterAverage),
            ],
        },
    ],
};

static LOWER_PRIMARY: SchemeLayout = SchemeLayout {
    slots: &[SlotKey::MidYear, SlotKey::FinalExam],
    aggregates: &[],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GradingScheme {
    Standard,
    UpperPrimary,
    LowerPrimary,
}

impl GradingScheme {
    pub fn for_class(level: SchoolLevel, grade: u8) -> Self {
        match (level, grade) {
            (SchoolLevel::Primary, 1..=4) => GradingScheme::LowerPrimary,
            (SchoolLevel::Primary, 5..=6) => GradingScheme::UpperPrimary,
            _ => GradingScheme::Standard,
        }
    }

    pub fn layout(self) -> &'static SchemeLayout {
        match self {
            GradingScheme::Standard => &STANDARD,
            GradingScheme::UpperPrimary => &UPPER_PRIMARY,
            GradingScheme::LowerPrimary => &LOWER_PRIMARY,
        }
    }

    pub fn max_score(self) -> u16 {
        match self {
            GradingScheme::LowerPrimary => 10,
            GradingScheme::Standard | GradingScheme::UpperPrimary => 100,
        }
    }

    /// Digit length of `max_score`, the point at which typed input is complete.
    pub fn max_digits(self) -> usize {
        self.max_score().to_string().len()
    }

    pub fn has_slot(self, key: SlotKey) -> bool {
        self.layout().slots.contains(&key)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GradingScheme::Standard => "standard",
            GradingScheme::UpperPrimary => "upperPrimary",
            GradingScheme::LowerPrimary => "lowerPrimary",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_by_level_and_grade() {
        assert_eq!(
            GradingScheme::for_class(SchoolLevel::Primary, 1),
            GradingScheme::LowerPrimary
        );
        assert_eq!(
            GradingScheme::for_class(SchoolLevel::Primary, 4),
            GradingScheme::LowerPrimary
        );
        assert_eq!(
            GradingScheme::for_class(SchoolLevel::Primary, 5),
            GradingScheme::UpperPrimary
        );
        assert_eq!(
            GradingScheme::for_class(SchoolLevel::Primary, 6),
            GradingScheme::UpperPrimary
        );
        assert_eq!(
            GradingScheme::for_class(SchoolLevel::Secondary, 5),
            GradingScheme::Standard
        );
        assert_eq!(
            GradingScheme::for_class(SchoolLevel::Intermediate, 2),
            GradingScheme::Standard
        );
    }

    #[test]
    fn derived_inputs_refer_to_earlier_aggregates() {
        for scheme in [
            GradingScheme::Standard,
            GradingScheme::UpperPrimary,
            GradingScheme::LowerPrimary,
        ] {
            let layout = scheme.layout();
            for (i, agg) in layout.aggregates.iter().enumerate() {
                for input in agg.inputs {
                    match input {
                        AggregateInput::Slot(k) => assert!(layout.slots.contains(k)),
                        AggregateInput::Derived(d) => assert!(layout.aggregates[..i]
                            .iter()
                            .any(|a| a.key == *d)),
                    }
                }
            }
        }
    }

    #[test]
    fn bounds_and_digits() {
        assert_eq!(GradingScheme::Standard.max_score(), 100);
        assert_eq!(GradingScheme::Standard.max_digits(), 3);
        assert_eq!(GradingScheme::LowerPrimary.max_score(), 10);
        assert_eq!(GradingScheme::LowerPrimary.max_digits(), 2);
    }
}
