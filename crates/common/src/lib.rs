// plenum-common: shared types and utilities for the plenum workspace

pub mod error;
pub mod protocol;
pub mod question;
pub mod types;
pub mod wordcloud;
