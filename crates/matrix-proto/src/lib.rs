//! Wire types, configuration and persistence shared by matrix controllers.

pub mod config;
pub mod marquee;
pub mod platform;
pub mod protocol;
pub mod state;
