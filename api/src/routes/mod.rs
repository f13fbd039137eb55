pub mod adapt;
pub mod events;
pub mod generate;
pub mod health;
pub mod missions;
pub mod prompts;
pub mod timeline;
