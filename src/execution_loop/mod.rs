pub mod error_classifier;
pub mod refinement;
pub mod refinement_loop;

pub use error_classifier::*;
pub use refinement::*;
pub use refinement_loop::*;
