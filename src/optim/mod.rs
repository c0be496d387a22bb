mod gaussnewton;
pub use gaussnewton::{GaussNewton, GaussNewtonBatch};
