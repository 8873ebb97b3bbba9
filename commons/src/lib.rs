pub mod catalog;
pub mod dependency;
