//! TCP accept loop for the dev server port.

pub mod listener;
