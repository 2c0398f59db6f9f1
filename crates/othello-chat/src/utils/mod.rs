pub mod error;
pub mod similarity;
