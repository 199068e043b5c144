pub(crate) mod capture_loop;
pub mod capture_session;
pub(crate) mod delivery;
