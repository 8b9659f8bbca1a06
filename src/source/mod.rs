// Release source abstraction: manifest resolution and archive download.

pub mod http_source;
pub mod manifest;
pub mod traits;
