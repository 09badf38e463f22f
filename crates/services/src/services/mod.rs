pub mod config;
pub mod speakers;
pub mod sso;
pub mod talk_policy;
