use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("model catalogue is empty")]
    EmptyCatalog,
    #[error("duplicate model id in catalogue: {0}")]
    DuplicateModel(String),
    #[error("no tool-eligible model in catalogue")]
    NoToolModel,
}
