use std::io;

use thiserror::Error;

/// Failures that stop processing of a single sample.
///
/// None of these are raised for ordinary search outcomes, like an isotope envelope
/// that cannot be extended any further.
#[derive(Debug, Error)]
pub enum SlingError {
    #[error("The run contains no MS1 signal to estimate a noise floor from")]
    EmptyRun,
    #[error("No peaks were found above the noise floor of {0:0.3}")]
    NoPeaksAboveNoise(f64),
    #[error("Failed to look up adducts for charge {charge}: {reason}")]
    AdductLookup { charge: i32, reason: String },
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
}
