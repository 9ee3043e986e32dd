pub mod backend;
pub mod controller;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod value;

pub use controller::{
    ExerciseState, LockState, Session, SessionConfig, Status, Submission,
};
pub use dataset::DatasetContext;
pub use error::{ExecutionFault, LoadError, SessionError, Warning};
pub use value::{Cell, ImageData, Output, Table};
