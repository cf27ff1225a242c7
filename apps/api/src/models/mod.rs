pub mod submission;
pub mod tailored;
