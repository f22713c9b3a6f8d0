//! Test suites spanning several modules.

mod scripts;
pub(crate) mod support;
