pub mod optimize;
pub mod synth;
