// Structural descriptors: named predicates over a whole window.
//
// Structural patterns (`"descriptor": "pachelbel"`) skip step alignment; the
// matcher looks the name up here and calls the predicate with the window and
// its extracted events. An unknown name is not a load error: the matcher
// reports `DescriptorFailed` for that pattern and carries on.
//
// Built-ins:
// - descending_fifths  three or more consecutive descending-fifth root motions
// - pachelbel          eight tokens with root degrees 1-5-6-3-4-1-4-5, any
//                      inversion
// - lament_bass        three or more consecutive stepwise bass descents
// - pedal_point        bass held from the first token to the last

use crate::error::RegistryError;
use crate::events::WindowEvents;
use crate::labels;
use crate::token::Token;
use std::collections::BTreeMap;

pub type DescriptorFn = fn(&[Token], &WindowEvents) -> bool;

const PACHELBEL_ROOTS: [u8; 8] = [1, 5, 6, 3, 4, 1, 4, 5];

fn descending_fifths(_window: &[Token], events: &WindowEvents) -> bool {
    events.longest_fifths_run >= 3
}

fn pachelbel(window: &[Token], _events: &WindowEvents) -> bool {
    window.len() == PACHELBEL_ROOTS.len()
        && window
            .iter()
            .zip(PACHELBEL_ROOTS)
            .all(|(t, degree)| labels::roman_degree(&t.label) == Some(degree))
}

fn lament_bass(_window: &[Token], events: &WindowEvents) -> bool {
    events.longest_stepwise_descent >= 3
}

fn pedal_point(window: &[Token], events: &WindowEvents) -> bool {
    events.bass_held_throughout(window.len())
}

#[derive(Clone, Debug)]
pub struct DescriptorRegistry {
    descriptors: BTreeMap<String, DescriptorFn>,
}

impl Default for DescriptorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DescriptorRegistry {
    pub fn empty() -> Self {
        DescriptorRegistry {
            descriptors: BTreeMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut descriptors: BTreeMap<String, DescriptorFn> = BTreeMap::new();
        descriptors.insert("descending_fifths".into(), descending_fifths);
        descriptors.insert("pachelbel".into(), pachelbel);
        descriptors.insert("lament_bass".into(), lament_bass);
        descriptors.insert("pedal_point".into(), pedal_point);
        DescriptorRegistry { descriptors }
    }

    pub fn register(&mut self, name: &str, descriptor: DescriptorFn) -> Result<(), RegistryError> {
        if self.descriptors.contains_key(name) {
            return Err(RegistryError::Duplicate {
                kind: "descriptor",
                name: name.to_string(),
            });
        }
        self.descriptors.insert(name.to_string(), descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<DescriptorFn> {
        self.descriptors.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }
}
