pub mod client;
pub mod locator;
pub mod parsing;
pub mod report;
pub mod utils;
