pub mod health;
pub mod replay;
pub mod webhooks;
