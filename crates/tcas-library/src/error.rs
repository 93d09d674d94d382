use thiserror::Error;

/// Failure to interpret one status segment.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{record}: missing {field}")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },

    #[error("{record}: {field} is not a number: {value:?}")]
    InvalidNumber {
        record: &'static str,
        field: &'static str,
        value: String,
    },
}
