use crate::error::TrackerError;

pub type TrackerResult<T> = Result<T, TrackerError>;
