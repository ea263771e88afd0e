pub mod instance_registry;
pub mod notifications;
pub mod observability;
