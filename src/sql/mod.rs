pub mod validator;

pub use validator::{validate, ValidatedSql, ValidationError};
