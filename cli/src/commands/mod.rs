pub mod health;
pub mod pair;
pub mod patch;
pub mod profile;
pub mod provider;
pub mod run;
pub mod sandbox;
pub mod session;
