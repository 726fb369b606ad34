#[path = "../azul_test/mod.rs"]
mod azul_test;

mod live_sync;
mod local_edit;
mod pack_build;
