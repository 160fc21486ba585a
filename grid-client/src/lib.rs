pub mod domain;
pub mod reports;
