pub mod cluster;
pub mod fusion_engine;
pub mod observation;
pub mod state_estimator;
pub mod world;
