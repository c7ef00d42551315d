//! Payment FSM State Definitions
//!
//! State IDs are designed for PostgreSQL storage as SMALLINT.

use std::fmt;

/// Payment transaction states
///
/// Terminal states: COMPLETED (30), EXPIRED (-20).
/// FAILED (-10) is a hold state: the settlement sweeper retries it until
/// the attempt budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum PaymentState {
    /// Reservation row written, service not yet invoked
    Reserved = 0,

    /// Protected handler is running
    Executing = 10,

    /// Handler succeeded, settlement call in flight
    /// CRITICAL: must eventually reach COMPLETED or FAILED
    Settling = 20,

    /// Terminal: settled, cached result is visible
    Completed = 30,

    /// Settlement errored or timed out; awaiting bounded retry
    Failed = -10,

    /// Terminal: reservation released, nonce dead
    Expired = -20,
}

impl PaymentState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentState::Completed | PaymentState::Expired)
    }

    /// Check if the sweeper may re-attempt settlement from this state
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentState::Failed | PaymentState::Settling)
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(PaymentState::Reserved),
            10 => Some(PaymentState::Executing),
            20 => Some(PaymentState::Settling),
            30 => Some(PaymentState::Completed),
            -10 => Some(PaymentState::Failed),
            -20 => Some(PaymentState::Expired),
            _ => None,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Reserved => "RESERVED",
            PaymentState::Executing => "EXECUTING",
            PaymentState::Settling => "SETTLING",
            PaymentState::Completed => "COMPLETED",
            PaymentState::Failed => "FAILED",
            PaymentState::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for PaymentState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        PaymentState::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(PaymentState::Completed.is_terminal());
        assert!(PaymentState::Expired.is_terminal());

        assert!(!PaymentState::Reserved.is_terminal());
        assert!(!PaymentState::Executing.is_terminal());
        assert!(!PaymentState::Settling.is_terminal());
        assert!(!PaymentState::Failed.is_terminal());
    }

    #[test]
    fn test_retryable_states() {
        assert!(PaymentState::Failed.is_retryable());
        assert!(PaymentState::Settling.is_retryable());

        assert!(!PaymentState::Reserved.is_retryable());
        assert!(!PaymentState::Executing.is_retryable());
        assert!(!PaymentState::Completed.is_retryable());
        assert!(!PaymentState::Expired.is_retryable());
    }

    #[test]
    fn test_state_id_roundtrip() {
        let states = [
            PaymentState::Reserved,
            PaymentState::Executing,
            PaymentState::Settling,
            PaymentState::Completed,
            PaymentState::Failed,
            PaymentState::Expired,
        ];

        for state in states {
            let id = state.id();
            let recovered = PaymentState::from_id(id).unwrap();
            assert_eq!(state, recovered);
        }
    }

    #[test]
    fn test_invalid_state_id() {
        assert!(PaymentState::from_id(999).is_none());
        assert!(PaymentState::from_id(-999).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(PaymentState::Reserved.to_string(), "RESERVED");
        assert_eq!(PaymentState::Completed.to_string(), "COMPLETED");
        assert_eq!(PaymentState::Expired.to_string(), "EXPIRED");
    }
}
