use thiserror::Error;

pub type BreakerResult<T> = Result<T, BreakerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BreakerError {
	#[error("zero or negative retry interval")]
	InvalidRetryInterval,

	#[error("unexpected status {0}")]
	UnexpectedState(u8),
}
