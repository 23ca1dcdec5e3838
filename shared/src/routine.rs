use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const MIN_DURATION_SECONDS: u32 = 1;
pub const MAX_DURATION_SECONDS: u32 = 9999;
pub const MIN_REPEATS: u32 = 1;
pub const MAX_REPEATS: u32 = 999;

const DEFAULT_IMPORT_DURATION: i64 = 30;
const DEFAULT_IMPORT_REPEATS: i64 = 1;

/// One exercise in a routine.
///
/// `repeats == 0` means "unspecified"; [`Exercise::required_repeats`] is the
/// value every completion check uses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Exercise {
    pub name: String,
    pub duration_seconds: u32,
    pub repeats: u32,
}

impl Exercise {
    pub fn new(name: impl Into<String>, duration_seconds: u32, repeats: u32) -> Self {
        Self {
            name: name.into(),
            duration_seconds,
            repeats,
        }
    }

    pub fn required_repeats(&self) -> u32 {
        self.repeats.max(1)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum RoutineError {
    #[error("Routine must contain at least one exercise")]
    Empty,

    #[error("Routine JSON must be an object")]
    NotAnObject,
}

/// An ordered, non-empty list of exercises.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "Vec<Exercise>", into = "Vec<Exercise>")]
pub struct Routine {
    exercises: Vec<Exercise>,
}

impl Routine {
    pub fn new(exercises: Vec<Exercise>) -> Result<Self, RoutineError> {
        if exercises.is_empty() {
            return Err(RoutineError::Empty);
        }
        let exercises = exercises
            .into_iter()
            .map(|mut e| {
                e.repeats = e.required_repeats();
                e
            })
            .collect();
        Ok(Self { exercises })
    }

    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    /// Never true for a constructed routine.
    pub fn is_empty(&self) -> bool {
        self.exercises.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Exercise> {
        self.exercises.get(index)
    }

    pub fn exercises(&self) -> &[Exercise] {
        &self.exercises
    }

    pub fn last_index(&self) -> usize {
        self.exercises.len() - 1
    }
}

impl TryFrom<Vec<Exercise>> for Routine {
    type Error = RoutineError;

    fn try_from(exercises: Vec<Exercise>) -> Result<Self, Self::Error> {
        Routine::new(exercises)
    }
}

impl From<Routine> for Vec<Exercise> {
    fn from(routine: Routine) -> Self {
        routine.exercises
    }
}

/// A routine as the user saved it.
///
/// Serializes to the compact `{"id","name","exercises":[{"n","d","r"}]}`
/// form used for both storage and export.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(into = "Value", try_from = "Value")]
pub struct NamedRoutine {
    pub id: String,
    pub name: String,
    pub routine: Routine,
}

impl NamedRoutine {
    pub fn to_json_value(&self) -> Value {
        let exercises: Vec<Value> = self
            .routine
            .exercises()
            .iter()
            .map(|e| json!({ "n": e.name, "d": e.duration_seconds, "r": e.repeats }))
            .collect();
        json!({ "id": self.id, "name": self.name, "exercises": exercises })
    }

    fn from_json_object(obj: &Map<String, Value>, index: usize) -> Option<Self> {
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("r_{}", index));
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Routine {}", index + 1));

        let exercises: Vec<Exercise> = obj
            .get("exercises")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_exercise).collect())
            .unwrap_or_default();

        let routine = Routine::new(exercises).ok()?;
        Some(Self { id, name, routine })
    }
}

impl From<NamedRoutine> for Value {
    fn from(routine: NamedRoutine) -> Self {
        routine.to_json_value()
    }
}

impl TryFrom<Value> for NamedRoutine {
    type Error = RoutineError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(obj) => {
                NamedRoutine::from_json_object(&obj, 0).ok_or(RoutineError::Empty)
            }
            _ => Err(RoutineError::NotAnObject),
        }
    }
}

fn parse_exercise(value: &Value) -> Option<Exercise> {
    let obj = value.as_object()?;
    let name = obj
        .get("n")
        .and_then(Value::as_str)
        .unwrap_or("Exercise")
        .to_string();
    let duration = obj
        .get("d")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_IMPORT_DURATION)
        .clamp(MIN_DURATION_SECONDS as i64, MAX_DURATION_SECONDS as i64);
    let repeats = obj
        .get("r")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_IMPORT_REPEATS)
        .clamp(MIN_REPEATS as i64, MAX_REPEATS as i64);
    Some(Exercise::new(name, duration as u32, repeats as u32))
}

/// Parse routines from user-supplied JSON.
///
/// Accepts an array of routine objects or a single object. Anything that
/// does not parse yields an empty list; routines without a usable exercise
/// are dropped.
pub fn parse_import(raw: &str) -> Vec<NamedRoutine> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                item.as_object()
                    .and_then(|obj| NamedRoutine::from_json_object(obj, i))
            })
            .collect(),
        Ok(Value::Object(obj)) => NamedRoutine::from_json_object(&obj, 0)
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

pub fn export_json(routine: &NamedRoutine) -> String {
    routine.to_json_value().to_string()
}

pub fn demo_routine() -> NamedRoutine {
    let exercises = vec![
        Exercise::new("Table Stretch - Front", 10, 2),
        Exercise::new("Pulley exercise - Front", 5, 2),
        Exercise::new("Leg Lift", 15, 2),
        Exercise::new("Arm Swing", 60, 2),
    ];
    NamedRoutine {
        id: "demo".to_string(),
        name: "Demo Routine".to_string(),
        // Non-empty literal list above.
        routine: Routine { exercises },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_repeats_normalizes_zero() {
        let e = Exercise::new("Stretch", 10, 0);
        assert_eq!(e.required_repeats(), 1);
        assert_eq!(Exercise::new("Stretch", 10, 3).required_repeats(), 3);
    }

    #[test]
    fn test_routine_rejects_empty() {
        assert_eq!(Routine::new(vec![]), Err(RoutineError::Empty));
    }

    #[test]
    fn test_routine_normalizes_repeats() {
        let routine = Routine::new(vec![Exercise::new("A", 5, 0)]).unwrap();
        assert_eq!(routine.get(0).unwrap().repeats, 1);
        assert_eq!(routine.len(), 1);
        assert_eq!(routine.last_index(), 0);
    }

    #[test]
    fn test_routine_deserialize_empty_fails() {
        let result: Result<Routine, _> = serde_json::from_str("[]");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_import_single_object() {
        let raw = r#"{"id":"knee","name":"Knee","exercises":[{"n":"Squat","d":20,"r":3}]}"#;
        let routines = parse_import(raw);
        assert_eq!(routines.len(), 1);
        assert_eq!(routines[0].id, "knee");
        assert_eq!(routines[0].name, "Knee");
        assert_eq!(
            routines[0].routine.get(0),
            Some(&Exercise::new("Squat", 20, 3))
        );
    }

    #[test]
    fn test_parse_import_array_with_defaults_and_clamping() {
        let raw = r#"[
            {"exercises":[{"d":0,"r":5000},{}]},
            "not an object",
            {"id":"empty","exercises":[]}
        ]"#;
        let routines = parse_import(raw);
        assert_eq!(routines.len(), 1);
        let r = &routines[0];
        assert_eq!(r.id, "r_0");
        assert_eq!(r.name, "Routine 1");
        assert_eq!(r.routine.get(0), Some(&Exercise::new("Exercise", 1, 999)));
        assert_eq!(r.routine.get(1), Some(&Exercise::new("Exercise", 30, 1)));
    }

    #[test]
    fn test_parse_import_clamps_long_duration() {
        let raw = r#"{"id":"x","name":"X","exercises":[{"n":"Hold","d":100000,"r":-2}]}"#;
        let routines = parse_import(raw);
        assert_eq!(
            routines[0].routine.get(0),
            Some(&Exercise::new("Hold", 9999, 1))
        );
    }

    #[test]
    fn test_parse_import_invalid_input() {
        assert!(parse_import("").is_empty());
        assert!(parse_import("   ").is_empty());
        assert!(parse_import("{broken").is_empty());
        assert!(parse_import("42").is_empty());
    }

    #[test]
    fn test_export_then_import_keeps_routine() {
        let demo = demo_routine();
        let exported = export_json(&demo);
        assert!(exported.contains(r#""n":"Leg Lift""#));
        let imported = parse_import(&exported);
        assert_eq!(imported, vec![demo]);
    }

    #[test]
    fn test_named_routine_serde_uses_compact_keys() {
        let demo = demo_routine();
        let json = serde_json::to_string(&vec![demo.clone()]).unwrap();
        assert!(json.contains(r#""d":10"#));
        let parsed: Vec<NamedRoutine> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, vec![demo]);
    }

    #[test]
    fn test_named_routine_deserialize_rejects_non_object() {
        let result: Result<NamedRoutine, _> = serde_json::from_str("[1,2]");
        assert!(result.is_err());
    }

    #[test]
    fn test_demo_routine_contents() {
        let demo = demo_routine();
        assert_eq!(demo.id, "demo");
        assert_eq!(demo.routine.len(), 4);
        assert_eq!(demo.routine.get(3), Some(&Exercise::new("Arm Swing", 60, 2)));
    }
}
