// Errors shared by the name-keyed registries (descriptors, constraints,
// evaluators). Library, config and calibration-fit errors live with their
// modules.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{kind} `{name}` is already registered")]
    Duplicate { kind: &'static str, name: String },
}
