// Local asset server — loopback HTTP endpoint for the embedded browser.

pub mod handler;
pub mod resolve;
