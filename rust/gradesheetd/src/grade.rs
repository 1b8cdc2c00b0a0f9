use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Wire sentinel for an absent student.
pub const ABSENT_CODE: i64 = -1;
/// Wire sentinel for an exempted student.
pub const EXEMPTED_CODE: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotKey {
    FirstSemMonth1,
    FirstSemMonth2,
    MidYear,
    SecondSemMonth1,
    SecondSemMonth2,
    FinalExam,
    October,
    November,
    December,
    January,
    February,
    March,
    April,
}

impl SlotKey {
    pub const ALL: [SlotKey; 13] = [
        SlotKey::FirstSemMonth1,
        SlotKey::FirstSemMonth2,
        SlotKey::MidYear,
        SlotKey::SecondSemMonth1,
        SlotKey::SecondSemMonth2,
        SlotKey::FinalExam,
        SlotKey::October,
        SlotKey::November,
        SlotKey::December,
        SlotKey::January,
        SlotKey::February,
        SlotKey::March,
        SlotKey::April,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SlotKey::FirstSemMonth1 => "firstSemMonth1",
            SlotKey::FirstSemMonth2 => "firstSemMonth2",
            SlotKey::MidYear => "midYear",
            SlotKey::SecondSemMonth1 => "secondSemMonth1",
            SlotKey::SecondSemMonth2 => "secondSemMonth2",
            SlotKey::FinalExam => "finalExam",
            SlotKey::October => "october",
            SlotKey::November => "november",
            SlotKey::December => "december",
            SlotKey::January => "january",
            SlotKey::February => "february",
            SlotKey::March => "march",
            SlotKey::April => "april",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

/// One grade cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotValue {
    #[default]
    NotEntered,
    Score(u16),
    Absent,
    Exempted,
}

impl SlotValue {
    pub fn score(self) -> Option<u16> {
        match self {
            SlotValue::Score(n) => Some(n),
            SlotValue::NotEntered | SlotValue::Absent | SlotValue::Exempted => None,
        }
    }

    pub fn to_wire(self) -> Option<i64> {
        match self {
            SlotValue::NotEntered => None,
            SlotValue::Score(n) => Some(i64::from(n)),
            SlotValue::Absent => Some(ABSENT_CODE),
            SlotValue::Exempted => Some(EXEMPTED_CODE),
        }
    }

    pub fn from_wire(raw: Option<i64>) -> Result<Self, String> {
        match raw {
            None => Ok(SlotValue::NotEntered),
            Some(ABSENT_CODE) => Ok(SlotValue::Absent),
            Some(EXEMPTED_CODE) => Ok(SlotValue::Exempted),
            Some(n) if n >= 0 => u16::try_from(n)
                .map(SlotValue::Score)
                .map_err(|_| format!("score out of range: {n}")),
            Some(n) => Err(format!("unknown sentinel code: {n}")),
        }
    }
}

impl Serialize for SlotValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SlotValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<i64>::deserialize(deserializer)?;
        SlotValue::from_wire(raw).map_err(D::Error::custom)
    }
}

/// Per-student, per-subject grade record. Slots that were never written read as
/// `NotEntered`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectGrade {
    slots: BTreeMap<SlotKey, SlotValue>,
}

impl SubjectGrade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: SlotKey) -> SlotValue {
        self.slots.get(&key).copied().unwrap_or_default()
    }

    pub fn set(&mut self, key: SlotKey, value: SlotValue) {
        if value == SlotValue::NotEntered {
            self.slots.remove(&key);
        } else {
            self.slots.insert(key, value);
        }
    }

    pub fn with(mut self, key: SlotKey, value: SlotValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotKey, SlotValue)> + '_ {
        self.slots.iter().map(|(k, v)| (*k, *v))
    }
}

/// Student gender used for sentinel labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Male,
    Female,
}

impl Gender {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Some(Gender::Male),
            "female" | "f" => Some(Gender::Female),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

pub fn display_value(value: SlotValue, gender: Gender) -> String {
    match (value, gender) {
        (SlotValue::NotEntered, _) => String::new(),
        (SlotValue::Score(n), _) => n.to_string(),
        (SlotValue::Absent, Gender::Male) => "غائب".to_string(),
        (SlotValue::Absent, Gender::Female) => "غائبة".to_string(),
        (SlotValue::Exempted, Gender::Male) => "مجاز".to_string(),
        (SlotValue::Exempted, Gender::Female) => "مجازة".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_encoding_uses_sentinel_codes() {
        let g = SubjectGrade::new()
            .with(SlotKey::FirstSemMonth1, SlotValue::Score(0))
            .with(SlotKey::MidYear, SlotValue::Absent)
            .with(SlotKey::SecondSemMonth1, SlotValue::Exempted);
        let v = serde_json::to_value(&g).expect("serialize");
        assert_eq!(
            v,
            json!({ "firstSemMonth1": 0, "midYear": -1, "secondSemMonth1": -2 })
        );
    }

    #[test]
    fn null_and_missing_slots_read_as_not_entered() {
        let g: SubjectGrade =
            serde_json::from_value(json!({ "midYear": null, "october": 7 })).expect("parse");
        assert_eq!(g.get(SlotKey::MidYear), SlotValue::NotEntered);
        assert_eq!(g.get(SlotKey::FinalExam), SlotValue::NotEntered);
        assert_eq!(g.get(SlotKey::October), SlotValue::Score(7));
    }

    #[test]
    fn unknown_negative_code_is_rejected() {
        let r: Result<SubjectGrade, _> = serde_json::from_value(json!({ "midYear": -3 }));
        assert!(r.is_err());
    }

    #[test]
    fn zero_is_a_score_not_an_empty_slot() {
        let g = SubjectGrade::new().with(SlotKey::MidYear, SlotValue::Score(0));
        assert_eq!(g.get(SlotKey::MidYear).score(), Some(0));
        assert!(!g.is_empty());
    }

    #[test]
    fn sentinel_labels_follow_gender() {
        assert_eq!(display_value(SlotValue::Absent, Gender::Male), "غائب");
        assert_eq!(display_value(SlotValue::Absent, Gender::Female), "غائبة");
        assert_eq!(display_value(SlotValue::Exempted, Gender::Male), "مجاز");
        assert_eq!(display_value(SlotValue::Exempted, Gender::Female), "مجازة");
        assert_eq!(display_value(SlotValue::NotEntered, Gender::Female), "");
    }
}
