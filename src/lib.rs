pub mod logging;
pub mod settings;
pub mod shade;
pub mod web;
