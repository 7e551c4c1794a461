pub mod arrival;
pub mod assignment;
pub mod completion;
pub mod escalation;
pub mod location_broadcast;
pub mod matcher;
pub mod movement;
pub mod retry;
