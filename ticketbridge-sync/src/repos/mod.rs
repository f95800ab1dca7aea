pub mod comments;
pub mod deadletter;
pub mod mapping;
pub mod processed;
