pub mod document;
pub mod example;
