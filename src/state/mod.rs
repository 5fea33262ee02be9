pub mod event_state;
pub mod session_state;
