//! Blade constraint evaluation
//!
//! A `BladeSpec` is a constraint, not a value: numeric fields accept an exact
//! number or an inclusive range (`"4-8"`), `dn` and `model` accept a regular
//! expression. Change detection asks whether the *assigned* blade still
//! satisfies the new constraint rather than comparing strings.

use crate::error::ConfigError;
use crate::model::{BladeAssigned, BladeSpec};
use regex::Regex;
use std::sync::LazyLock;

static RANGE_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"([0-9]+)\s*-\s*([0-9]*)"));

/// Check whether `observed` satisfies `constraint`
///
/// `"A-B"` is inclusive on both ends; any other constraint must be an integer
/// equal to `observed`.
///
/// # Errors
///
/// Returns `ConfigError::Constraint` when the constraint is neither a range nor
/// an integer, or the range has no upper bound.
pub fn value_in_range(constraint: &str, observed: i64) -> Result<bool, ConfigError> {
    let re = RANGE_RE
        .as_ref()
        .map_err(|e| ConfigError::Constraint(e.to_string()))?;
    if let Some(caps) = re.captures(constraint) {
        let lower = parse_bound(constraint, caps.get(1).map_or("", |m| m.as_str()))?;
        let upper = parse_bound(constraint, caps.get(2).map_or("", |m| m.as_str()))?;
        return Ok(observed >= lower && observed <= upper);
    }
    let exact = parse_bound(constraint, constraint.trim())?;
    Ok(exact == observed)
}

fn parse_bound(constraint: &str, raw: &str) -> Result<i64, ConfigError> {
    raw.parse::<i64>().map_err(|e| {
        ConfigError::Constraint(format!("unexpected value \"{constraint}\": {e}"))
    })
}

/// Unanchored regular-expression match of `value` against `pattern`
///
/// # Errors
///
/// Returns `ConfigError::Constraint` if `pattern` does not compile.
pub fn matches_pattern(pattern: &str, value: &str) -> Result<bool, ConfigError> {
    let re = Regex::new(pattern)
        .map_err(|e| ConfigError::Constraint(format!("regexp {pattern}: {e}")))?;
    Ok(re.is_match(value))
}

impl BladeSpec {
    /// Build a constraint that pins exactly the assigned blade
    #[must_use]
    pub fn from_assigned(assigned: &BladeAssigned) -> Self {
        assigned.spec.clone()
    }

    /// Fields evaluated as regular expressions
    fn pattern_fields(&self) -> [(&'static str, &str); 2] {
        [("dn", self.dn.as_str()), ("model", self.model.as_str())]
    }

    /// Fields evaluated as numeric range/equality
    fn numeric_fields(&self) -> [(&'static str, &str); 4] {
        [
            ("num_of_cpus", self.num_of_cpus.as_str()),
            ("num_of_cores", self.num_of_cores.as_str()),
            ("num_of_threads", self.num_of_threads.as_str()),
            ("total_memory", self.total_memory.as_str()),
        ]
    }

    /// Whether moving from `old` to `self` requires a different blade
    ///
    /// Only fields that changed and are non-empty in `self` are evaluated;
    /// each is tested against the value observed on `assigned`.
    ///
    /// # Errors
    ///
    /// Fails when an assigned numeric value is not an integer or a constraint
    /// cannot be parsed.
    pub fn requires_reassignment(
        &self,
        old: &BladeSpec,
        assigned: &BladeAssigned,
    ) -> Result<bool, ConfigError> {
        let observed = &assigned.spec;
        let mut changed = false;
        for ((field, new), ((_, prev), (_, seen))) in self
            .pattern_fields()
            .into_iter()
            .zip(old.pattern_fields().into_iter().zip(observed.pattern_fields()))
        {
            if new != prev && !new.is_empty() && !matches_pattern(new, seen)? {
                tracing::debug!("blade_spec.{field}={new} no longer matches assigned {seen}");
                changed = true;
            }
        }
        for ((field, new), ((_, prev), (_, seen))) in self
            .numeric_fields()
            .into_iter()
            .zip(old.numeric_fields().into_iter().zip(observed.numeric_fields()))
        {
            if new == prev || new.is_empty() {
                continue;
            }
            let value: i64 = seen.trim().parse().map_err(|e| {
                ConfigError::Constraint(format!("unexpected value {field}={seen}: {e}"))
            })?;
            let in_range = value_in_range(new, value).map_err(|e| {
                ConfigError::Constraint(format!("unexpected blade_spec value {field}={new}: {e}"))
            })?;
            if !in_range {
                tracing::debug!("blade_spec.{field}={new} excludes assigned {value}");
                changed = true;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assigned(cpus: &str, model: &str) -> BladeAssigned {
        BladeAssigned {
            spec: BladeSpec {
                dn: "sys/chassis-1/blade-3".to_string(),
                model: model.to_string(),
                num_of_cpus: cpus.to_string(),
                num_of_cores: "36".to_string(),
                num_of_threads: "72".to_string(),
                total_memory: "262144".to_string(),
            },
            serial: "FCH1234".to_string(),
        }
    }

    #[test]
    fn test_value_in_range() {
        assert!(value_in_range("4-8", 6).unwrap());
        assert!(!value_in_range("4-8", 9).unwrap());
        assert!(value_in_range("4", 4).unwrap());
        assert!(value_in_range("4 - 8", 8).unwrap());
        assert!(!value_in_range("4", 5).unwrap());
    }

    #[test]
    fn test_value_in_range_rejects_garbage() {
        assert!(value_in_range("four", 4).is_err());
        assert!(value_in_range("4-", 4).is_err());
    }

    #[test]
    fn test_widened_range_keeps_blade() {
        let old = BladeSpec { num_of_cpus: "6".to_string(), ..Default::default() };
        let new = BladeSpec { num_of_cpus: "4-8".to_string(), ..Default::default() };
        assert!(!new.requires_reassignment(&old, &assigned("6", "UCSB-B200-M5")).unwrap());
    }

    #[test]
    fn test_out_of_range_requires_blade() {
        let old = BladeSpec { num_of_cpus: "6".to_string(), ..Default::default() };
        let new = BladeSpec { num_of_cpus: "4-8".to_string(), ..Default::default() };
        assert!(new.requires_reassignment(&old, &assigned("10", "UCSB-B200-M5")).unwrap());
    }

    #[test]
    fn test_model_pattern() {
        let old = BladeSpec::default();
        let new = BladeSpec { model: "B200-M[56]".to_string(), ..Default::default() };
        assert!(!new.requires_reassignment(&old, &assigned("2", "UCSB-B200-M5")).unwrap());
        assert!(new.requires_reassignment(&old, &assigned("2", "UCSB-B480-M5")).unwrap());
    }

    #[test]
    fn test_unchanged_field_not_evaluated() {
        // Identical old/new is skipped even when the assigned blade drifted
        let spec = BladeSpec { num_of_cpus: "2".to_string(), ..Default::default() };
        assert!(!spec.requires_reassignment(&spec, &assigned("4", "x")).unwrap());
    }

    #[test]
    fn test_assigned_blade_as_previous_constraint() {
        let current = assigned("2", "UCSB-B200-M5 (refurb)");
        let pinned = BladeSpec::from_assigned(&current);
        assert_eq!(pinned, current.spec);
        // unchanged fields are not re-matched, so literal model names are safe
        assert!(!pinned.requires_reassignment(&pinned, &current).unwrap());
        assert!(pinned.requires_reassignment(&BladeSpec::default(), &current).unwrap());
    }

    #[test]
    fn test_non_numeric_assigned_value_is_error() {
        let old = BladeSpec::default();
        let new = BladeSpec { num_of_cpus: "2".to_string(), ..Default::default() };
        let err = new.requires_reassignment(&old, &assigned("n/a", "x")).unwrap_err();
        assert!(err.to_string().contains("unexpected value num_of_cpus=n/a"));
    }
}
