pub mod deploy;
pub mod plan;
pub mod secret;
pub mod stages;
pub mod validate;
pub mod verify;
