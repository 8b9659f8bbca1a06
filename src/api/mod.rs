pub mod game_api;
pub mod simple;
