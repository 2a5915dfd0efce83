use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate controller name '{0}'")]
    DuplicateController(String),

    #[error("controller '{controller}' declares more than one primary input")]
    MultiplePrimaryInputs { controller: String },

    #[error("output {kind} claimed exclusively by '{first}' conflicts with '{second}'")]
    ExclusiveOutputConflict { kind: String, first: String, second: String },

    #[error("cycle detected in the controller dependency graph")]
    CycleDetected,

    #[error("multiple errors")]
    Multiple(Vec<GraphError>),
}
