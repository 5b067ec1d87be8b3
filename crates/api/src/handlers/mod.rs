pub mod health;
pub mod modules;
pub mod session;
pub mod workers;
