pub mod address_space;
pub mod host;
pub mod sweep;
