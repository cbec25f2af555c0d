mod common;
mod confinement_tests;
mod host_tests;
mod lifecycle_tests;
