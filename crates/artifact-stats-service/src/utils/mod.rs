pub mod clock;
pub mod defer;
pub mod http;
