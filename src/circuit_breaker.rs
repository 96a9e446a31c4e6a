use crate::errors::AppError;
use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::future::Future;
use std::time::Duration;

/// Concrete breaker type shared by the database store and the Oracle clients.
pub type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for database operations to prevent cascading failures.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: Too many failures, requests fail fast.
/// - **HALF_OPEN**: Testing if service recovered.
pub fn create_db_circuit_breaker() -> Breaker {
    build(5, Duration::from_secs(10), Duration::from_secs(60))
}

/// Breaker for Oracle providers: 5 consecutive failed calls open it, recovery is
/// probed after 5s, backing off to 60s.
pub fn create_oracle_circuit_breaker() -> Breaker {
    build(5, Duration::from_secs(5), Duration::from_secs(60))
}

fn build(threshold: u32, initial: Duration, max: Duration) -> Breaker {
    let backoff_strategy = backoff::exponential(initial, max);
    let failure_policy = failure_policy::consecutive_failures(threshold, backoff_strategy);
    Config::new().failure_policy(failure_policy).build()
}

/// Runs `fut` through `breaker`.
///
/// A rejection while the breaker is open surfaces as a non-retryable
/// `ExternalApiError`, so retry loops stop hammering a dependency that is down.
pub async fn guarded<T, F>(breaker: &Breaker, label: &str, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    use failsafe::futures::CircuitBreaker;

    match breaker.call(fut).await {
        Ok(value) => Ok(value),
        Err(failsafe::Error::Inner(e)) => Err(e),
        Err(failsafe::Error::Rejected) => {
            tracing::warn!("{} circuit breaker open, rejecting call", label);
            Err(AppError::ExternalApiError(format!(
                "{} unavailable (circuit open)",
                label
            )))
        }
    }
}
