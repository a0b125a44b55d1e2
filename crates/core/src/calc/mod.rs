pub mod availability;
pub mod pricing;
pub mod schedule;

use thiserror::Error;

use crate::errors::ToolError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CalcError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown product: {0}")]
    ProductNotFound(String),
}

impl From<CalcError> for ToolError {
    fn from(value: CalcError) -> Self {
        match value {
            CalcError::InvalidArgument(message) => Self::InvalidArgument(message),
            CalcError::ProductNotFound(product) => Self::ProductNotFound(product),
        }
    }
}
