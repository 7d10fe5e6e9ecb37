pub mod api;
pub mod serve;
pub mod upload;
