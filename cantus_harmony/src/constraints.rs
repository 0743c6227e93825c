// Global constraint registry.
//
// After a window aligns (or its descriptor accepts it), every registered
// checker runs against the whole window. Checkers are plain functions keyed
// by name; each one reads the part of `Constraints` it owns and returns
// `Ok(())` when that part is unset. The window's low-level events are
// extracted once by the matcher and handed to every checker in
// `ConstraintInput`, so checkers hold no state of their own and the registry
// can be shared across threads.
//
// Checkers run in name order and the first violation is reported.

use crate::error::RegistryError;
use crate::events::WindowEvents;
use crate::pattern::{Constraints, Presence, SopranoPosition};
use crate::token::{Role, Token};
use std::collections::BTreeMap;

/// Everything a checker may look at.
pub struct ConstraintInput<'a> {
    pub window: &'a [Token],
    /// Effective roles after any local reclassification, parallel to `window`.
    pub roles: &'a [Role],
    pub events: &'a WindowEvents,
}

pub type ConstraintFn = fn(&Constraints, &ConstraintInput<'_>) -> Result<(), String>;

fn check_presence(what: &str, want: Option<Presence>, present: bool) -> Result<(), String> {
    match (want, present) {
        (Some(Presence::Required), false) => Err(format!("window contains no {what}")),
        (Some(Presence::Forbidden), true) => Err(format!("window contains a {what}")),
        _ => Ok(()),
    }
}

fn mode(c: &Constraints, input: &ConstraintInput<'_>) -> Result<(), String> {
    let Some(mode) = &c.mode else { return Ok(()) };
    match input.window.iter().position(|t| &t.mode != mode) {
        Some(i) => Err(format!(
            "token {i} is in {} mode, {mode} required",
            input.window[i].mode
        )),
        None => Ok(()),
    }
}

fn secondary_dominants(c: &Constraints, input: &ConstraintInput<'_>) -> Result<(), String> {
    check_presence(
        "secondary dominant",
        c.secondary_dominants,
        !input.events.secondary_dominants.is_empty(),
    )
}

fn bass_motion(c: &Constraints, input: &ConstraintInput<'_>) -> Result<(), String> {
    let Some(allowed) = &c.bass_motion else { return Ok(()) };
    match input.events.inner_motions.iter().find(|m| !allowed.contains(m)) {
        Some(m) => Err(format!("bass motion {m:+} not in {allowed:?}")),
        None => Ok(()),
    }
}

fn soprano(c: &Constraints, input: &ConstraintInput<'_>) -> Result<(), String> {
    let Some(soprano) = &c.soprano else { return Ok(()) };
    let in_set = |t: &Token| t.soprano_degree.is_some_and(|d| soprano.degrees.contains(&d));
    let ok = match soprano.position {
        SopranoPosition::Anywhere => input.window.iter().any(in_set),
        SopranoPosition::Arrival => input.window.last().is_some_and(in_set),
    };
    if ok {
        Ok(())
    } else {
        let where_ = match soprano.position {
            SopranoPosition::Anywhere => "anywhere in the window",
            SopranoPosition::Arrival => "on the final token",
        };
        Err(format!("soprano degree {:?} not found {where_}", soprano.degrees))
    }
}

fn required_flags(c: &Constraints, input: &ConstraintInput<'_>) -> Result<(), String> {
    match c
        .required_flags
        .iter()
        .find(|f| !input.window.iter().any(|t| t.has_flag(f)))
    {
        Some(flag) => Err(format!("no token carries required flag `{flag}`")),
        None => Ok(()),
    }
}

fn forbidden_flags(c: &Constraints, input: &ConstraintInput<'_>) -> Result<(), String> {
    for flag in &c.forbidden_flags {
        if let Some(i) = input.window.iter().position(|t| t.has_flag(flag)) {
            return Err(format!("token {i} carries forbidden flag `{flag}`"));
        }
    }
    Ok(())
}

fn cadential_six_four(c: &Constraints, input: &ConstraintInput<'_>) -> Result<(), String> {
    check_presence(
        "cadential six-four",
        c.cadential_six_four,
        !input.events.cadential_six_fours.is_empty(),
    )
}

fn pedal_point(c: &Constraints, input: &ConstraintInput<'_>) -> Result<(), String> {
    check_presence("pedal point", c.pedal_point, !input.events.pedal_points.is_empty())
}

fn fifths_chain(c: &Constraints, input: &ConstraintInput<'_>) -> Result<(), String> {
    match c.fifths_chain_min {
        Some(min) if input.events.longest_fifths_run < min => Err(format!(
            "longest descending-fifths chain is {}, need {min}",
            input.events.longest_fifths_run
        )),
        _ => Ok(()),
    }
}

#[derive(Clone, Debug)]
pub struct ConstraintRegistry {
    checkers: BTreeMap<String, ConstraintFn>,
}

impl Default for ConstraintRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ConstraintRegistry {
    pub fn builtin() -> Self {
        let mut checkers: BTreeMap<String, ConstraintFn> = BTreeMap::new();
        checkers.insert("mode".into(), mode);
        checkers.insert("secondary_dominants".into(), secondary_dominants);
        checkers.insert("bass_motion".into(), bass_motion);
        checkers.insert("soprano".into(), soprano);
        checkers.insert("required_flags".into(), required_flags);
        checkers.insert("forbidden_flags".into(), forbidden_flags);
        checkers.insert("cadential_six_four".into(), cadential_six_four);
        checkers.insert("pedal_point".into(), pedal_point);
        checkers.insert("fifths_chain".into(), fifths_chain);
        ConstraintRegistry { checkers }
    }

    pub fn register(&mut self, name: &str, checker: ConstraintFn) -> Result<(), RegistryError> {
        if self.checkers.contains_key(name) {
            return Err(RegistryError::Duplicate {
                kind: "constraint",
                name: name.to_string(),
            });
        }
        self.checkers.insert(name.to_string(), checker);
        Ok(())
    }

    /// Run every checker; the first violation is returned as
    /// `(checker name, detail)`.
    pub fn check(
        &self,
        constraints: &Constraints,
        input: &ConstraintInput<'_>,
    ) -> Result<(), (String, String)> {
        for (name, checker) in &self.checkers {
            checker(constraints, input).map_err(|detail| (name.clone(), detail))?;
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.checkers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::pattern::SopranoConstraint;

    fn run(constraints: &Constraints, window: &[Token]) -> Result<(), (String, String)> {
        let roles: Vec<Role> = window.iter().map(|t| t.role).collect();
        let events = events::extract(window);
        let input = ConstraintInput {
            window,
            roles: &roles,
            events: &events,
        };
        ConstraintRegistry::builtin().check(constraints, &input)
    }

    fn cadence() -> Vec<Token> {
        vec![
            Token::new("ii6", Role::Predominant).with_soprano(2),
            Token::new("V7", Role::Dominant).with_bass_motion(1).with_soprano(7),
            Token::new("I", Role::Tonic).with_bass_motion(-7).with_soprano(1),
        ]
    }

    #[test]
    fn empty_constraints_pass() {
        assert_eq!(run(&Constraints::default(), &cadence()), Ok(()));
    }

    #[test]
    fn soprano_arrival_checks_last_token_only() {
        let mut c = Constraints::default();
        c.soprano = Some(SopranoConstraint {
            degrees: vec![2],
            position: SopranoPosition::Arrival,
        });
        let (name, _) = run(&c, &cadence()).unwrap_err();
        assert_eq!(name, "soprano");

        c.soprano = Some(SopranoConstraint {
            degrees: vec![2],
            position: SopranoPosition::Anywhere,
        });
        assert_eq!(run(&c, &cadence()), Ok(()));
    }

    #[test]
    fn bass_motion_whitelist() {
        let mut c = Constraints::default();
        c.bass_motion = Some(vec![1, 5, -7]);
        assert_eq!(run(&c, &cadence()), Ok(()));
        c.bass_motion = Some(vec![1, 2]);
        let (name, detail) = run(&c, &cadence()).unwrap_err();
        assert_eq!(name, "bass_motion");
        assert!(detail.contains("-7"));
    }

    #[test]
    fn secondary_dominant_presence() {
        let mut c = Constraints::default();
        c.secondary_dominants = Some(Presence::Required);
        assert_eq!(run(&c, &cadence()).unwrap_err().0, "secondary_dominants");
        c.secondary_dominants = Some(Presence::Forbidden);
        assert_eq!(run(&c, &cadence()), Ok(()));
    }

    #[test]
    fn mode_and_flags() {
        let mut c = Constraints::default();
        c.mode = Some("minor".to_string());
        assert_eq!(run(&c, &cadence()).unwrap_err().0, "mode");

        let mut c = Constraints::default();
        c.required_flags = vec!["fermata".to_string()];
        assert_eq!(run(&c, &cadence()).unwrap_err().0, "required_flags");

        let mut window = cadence();
        window[2] = window[2].clone().with_flag("fermata");
        assert_eq!(run(&c, &window), Ok(()));
        let mut c = Constraints::default();
        c.forbidden_flags = vec!["fermata".to_string()];
        assert_eq!(run(&c, &window).unwrap_err().0, "forbidden_flags");
    }

    #[test]
    fn fifths_chain_minimum() {
        let mut c = Constraints::default();
        c.fifths_chain_min = Some(1);
        assert_eq!(run(&c, &cadence()), Ok(()));
        c.fifths_chain_min = Some(3);
        assert_eq!(run(&c, &cadence()).unwrap_err().0, "fifths_chain");
    }

    #[test]
    fn duplicate_constraint_name_fails() {
        let mut registry = ConstraintRegistry::builtin();
        assert!(registry.register("mode", |_, _| Ok(())).is_err());
        assert!(registry.register("always_ok", |_, _| Ok(())).is_ok());
    }
}
