pub mod relay_worker;
