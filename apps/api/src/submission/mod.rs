//! Submission intake and the collaborators behind the background stages.

pub mod blob;
pub mod extraction;
pub mod handlers;
pub mod parser;
pub mod stages;
