//! Domain logic for Lifemap, kept free of I/O so every rule is unit-testable:
//! provenance tracking, adaptation context windows, generation-output
//! parsing, merge planning, prompt templates, and the shared error shape.

pub mod auth;
pub mod error;
pub mod merge;
pub mod parser;
pub mod prompts;
pub mod provenance;
pub mod window;
