//! Integration tests for the tenant sync client

mod test_actions;
mod test_session;
mod test_tracking;
