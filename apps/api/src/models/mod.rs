pub mod enhancement;
pub mod submission;
