pub mod api;
pub mod config;
pub mod delete;
pub mod edit;
pub mod pages;
pub mod runtime;
pub mod sections;
pub mod tasks;
pub mod wikitext;
