use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("Refusing candidacy for term {term}: node is under high load")]
    UnderHighLoad { term: u64 },

    #[error("Cannot run an election in an empty cluster")]
    EmptyCluster,

    #[error("Invalid load monitor configuration: {0}")]
    InvalidConfig(String),
}
