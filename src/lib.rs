pub mod config;
pub mod errors;
pub mod logging;
pub mod studio;
pub mod ui;
