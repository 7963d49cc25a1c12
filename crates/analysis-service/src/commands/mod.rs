pub mod healthcheck;
pub mod run;
pub mod validate_config;
